//! NIfTI-1 single-file volumes (`.nii`, `.nii.gz`)
//!
//! Geometry is read from the sform when present, then the qform, then the
//! voxel sizes alone. Files are written little-endian with both transforms set
//! to scanner-anatomical coordinates.

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use byteorder::{BigEndian, ByteOrder, LittleEndian, WriteBytesExt};
use flate2::{Compression, read::MultiGzDecoder, write::GzEncoder};

use crate::{
    error::CodecError,
    volume::{Geometry, Volume, VoxelData, VoxelType, cross, dot},
};

const HEADER_SIZE: usize = 348;
const VOXEL_OFFSET: usize = 352;
const FORMAT: &str = "NIfTI";

const NIFTI_XFORM_SCANNER_ANAT: i16 = 1;
const NIFTI_UNITS_MM: u8 = 2;

fn datatype_code(voxel_type: VoxelType) -> i16 {
    match voxel_type {
        VoxelType::U8 => 2,
        VoxelType::I16 => 4,
        VoxelType::I32 => 8,
        VoxelType::F32 => 16,
        VoxelType::F64 => 64,
        VoxelType::I8 => 256,
        VoxelType::U16 => 512,
        VoxelType::U32 => 768,
    }
}

fn voxel_type(code: i16) -> Result<VoxelType, CodecError> {
    Ok(match code {
        2 => VoxelType::U8,
        4 => VoxelType::I16,
        8 => VoxelType::I32,
        16 => VoxelType::F32,
        64 => VoxelType::F64,
        256 => VoxelType::I8,
        512 => VoxelType::U16,
        768 => VoxelType::U32,
        other => return Err(CodecError::UnsupportedVoxelType(format!("NIfTI datatype {other}"))),
    })
}

/// Fixed-offset field access over a raw header
struct RawHeader<'a> {
    bytes: &'a [u8],
    big_endian: bool,
}

impl RawHeader<'_> {
    fn i16_at(&self, offset: usize) -> i16 {
        let bytes = &self.bytes[offset..offset + 2];
        if self.big_endian {
            BigEndian::read_i16(bytes)
        } else {
            LittleEndian::read_i16(bytes)
        }
    }

    fn f32_at(&self, offset: usize) -> f32 {
        let bytes = &self.bytes[offset..offset + 4];
        if self.big_endian {
            BigEndian::read_f32(bytes)
        } else {
            LittleEndian::read_f32(bytes)
        }
    }

    fn f64_at(&self, offset: usize) -> f64 {
        self.f32_at(offset) as f64
    }
}

/// Reads a `.nii` or `.nii.gz` file; compression is detected from the content
pub fn read_file(path: impl AsRef<Path>) -> Result<Volume, CodecError> {
    let mut raw = Vec::new();
    BufReader::new(File::open(path.as_ref())?).read_to_end(&mut raw)?;

    if raw.starts_with(&[0x1f, 0x8b]) {
        let mut inflated = Vec::new();
        MultiGzDecoder::new(raw.as_slice()).read_to_end(&mut inflated)?;
        decode(&inflated)
    } else {
        decode(&raw)
    }
}

/// Decodes an uncompressed single-file NIfTI-1 image
pub fn decode(bytes: &[u8]) -> Result<Volume, CodecError> {
    if bytes.len() < HEADER_SIZE {
        return Err(CodecError::header(FORMAT, "file shorter than header"));
    }

    let big_endian = if LittleEndian::read_i32(bytes) == HEADER_SIZE as i32 {
        false
    } else if BigEndian::read_i32(bytes) == HEADER_SIZE as i32 {
        true
    } else {
        return Err(CodecError::header(FORMAT, "sizeof_hdr is not 348"));
    };
    let header = RawHeader { bytes, big_endian };

    if &bytes[344..347] != b"n+1" {
        return Err(CodecError::header(FORMAT, "only single-file (n+1) images are supported"));
    }

    let rank = header.i16_at(40);
    if !(1..=7).contains(&rank) {
        return Err(CodecError::header(FORMAT, format!("invalid dimension count {rank}")));
    }
    let mut extent = [1usize; 3];
    for (axis, size) in extent.iter_mut().enumerate().take(rank.min(3) as usize) {
        let value = header.i16_at(42 + 2 * axis);
        if value < 1 {
            return Err(CodecError::header(FORMAT, format!("invalid size {value} on axis {axis}")));
        }
        *size = value as usize;
    }
    for axis in 3..rank as usize {
        if header.i16_at(42 + 2 * axis) > 1 {
            return Err(CodecError::header(FORMAT, "images with more than 3 dimensions are not supported"));
        }
    }

    let voxel_type = voxel_type(header.i16_at(70))?;
    let offset = header.f32_at(108) as usize;
    if offset < HEADER_SIZE || offset > bytes.len() {
        return Err(CodecError::header(FORMAT, format!("invalid vox_offset {offset}")));
    }

    let [nx, ny, nz] = extent;
    let mut data = VoxelData::from_bytes(voxel_type, (nz, ny, nx), &bytes[offset..], big_endian)?;

    let slope = header.f32_at(112);
    let intercept = header.f32_at(116);
    if slope.is_finite() && slope != 0.0 && (slope != 1.0 || intercept != 0.0) {
        data = data.rescaled(slope, intercept);
    }

    Ok(Volume::new(data, read_geometry(&header)))
}

fn read_geometry(header: &RawHeader<'_>) -> Geometry {
    let pixdim = |axis: usize| {
        let value = header.f64_at(76 + 4 * axis);
        if value > 0.0 { value } else { 1.0 }
    };

    if header.i16_at(254) > 0 {
        let mut affine = [[0.0; 4]; 3];
        for (row, out) in affine.iter_mut().enumerate() {
            for (col, value) in out.iter_mut().enumerate() {
                *value = header.f64_at(280 + 16 * row + 4 * col);
            }
        }
        return Geometry::from_ras_affine(&affine);
    }

    if header.i16_at(252) > 0 {
        let qfac = if header.f32_at(76) < 0.0 { -1.0 } else { 1.0 };
        let rotation = quaternion_to_rotation(header.f64_at(256), header.f64_at(260), header.f64_at(264));
        let spacing = [pixdim(1), pixdim(2), pixdim(3) * qfac];
        let offset = [header.f64_at(268), header.f64_at(272), header.f64_at(276)];
        let mut affine = [[0.0; 4]; 3];
        for row in 0..3 {
            for col in 0..3 {
                affine[row][col] = rotation[row][col] * spacing[col];
            }
            affine[row][3] = offset[row];
        }
        return Geometry::from_ras_affine(&affine);
    }

    Geometry {
        spacing: [pixdim(1), pixdim(2), pixdim(3)],
        ..Geometry::default()
    }
}

/// Rotation matrix (rows) for the quaternion `(a, b, c, d)` with `a` implied
fn quaternion_to_rotation(b: f64, c: f64, d: f64) -> [[f64; 3]; 3] {
    let (mut a, mut b, mut c, mut d) = (1.0 - (b * b + c * c + d * d), b, c, d);
    if a < 1.0e-7 {
        let scale = 1.0 / (b * b + c * c + d * d).sqrt();
        b *= scale;
        c *= scale;
        d *= scale;
        a = 0.0;
    } else {
        a = a.sqrt();
    }

    [
        [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
        [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
        [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - c * c - b * b],
    ]
}

/// Quaternion `(b, c, d)` and qfac for the rotation whose columns are the
/// unit axis vectors of `rotation`
fn rotation_to_quaternion(mut rotation: [[f64; 3]; 3]) -> ([f64; 3], f64) {
    let column = |r: &[[f64; 3]; 3], col: usize| [r[0][col], r[1][col], r[2][col]];
    let qfac = if dot(cross(column(&rotation, 0), column(&rotation, 1)), column(&rotation, 2)) < 0.0 {
        for row in rotation.iter_mut() {
            row[2] = -row[2];
        }
        -1.0
    } else {
        1.0
    };
    let [[r11, r12, r13], [r21, r22, r23], [r31, r32, r33]] = rotation;

    let trace = r11 + r22 + r33 + 1.0;
    let (a, b, c, d) = if trace > 0.5 {
        let a = 0.5 * trace.sqrt();
        (a, 0.25 * (r32 - r23) / a, 0.25 * (r13 - r31) / a, 0.25 * (r21 - r12) / a)
    } else {
        let xd = 1.0 + r11 - (r22 + r33);
        let yd = 1.0 + r22 - (r11 + r33);
        let zd = 1.0 + r33 - (r11 + r22);
        if xd > 1.0 {
            let b = 0.5 * xd.sqrt();
            (0.25 * (r32 - r23) / b, b, 0.25 * (r12 + r21) / b, 0.25 * (r13 + r31) / b)
        } else if yd > 1.0 {
            let c = 0.5 * yd.sqrt();
            (0.25 * (r13 - r31) / c, 0.25 * (r12 + r21) / c, c, 0.25 * (r23 + r32) / c)
        } else {
            let d = 0.5 * zd.sqrt();
            (0.25 * (r21 - r12) / d, 0.25 * (r13 + r31) / d, 0.25 * (r23 + r32) / d, d)
        }
    };

    // Keep `a` non-negative so it can be recovered from (b, c, d)
    if a < 0.0 {
        ([-b, -c, -d], qfac)
    } else {
        ([b, c, d], qfac)
    }
}

/// Encodes a volume as an uncompressed single-file NIfTI-1 image
pub fn encode(volume: &Volume) -> Result<Vec<u8>, CodecError> {
    let (nz, ny, nx) = volume.dim();
    let voxel_type = volume.voxel_type();
    let geometry = &volume.geometry;
    let dims = [nx, ny, nz].map(i16::try_from);
    let [Ok(nx), Ok(ny), Ok(nz)] = dims else {
        return Err(CodecError::header(FORMAT, "volume too large for a NIfTI-1 header"));
    };

    let ras = geometry.ras_affine();
    let mut rotation = [[0.0; 3]; 3];
    for (row, out) in rotation.iter_mut().enumerate() {
        for (col, value) in out.iter_mut().enumerate() {
            *value = ras[row][col] / geometry.spacing[col];
        }
    }
    let ([qb, qc, qd], qfac) = rotation_to_quaternion(rotation);

    let mut out = Vec::with_capacity(VOXEL_OFFSET + volume.data.len() * voxel_type.size());
    out.write_i32::<LittleEndian>(HEADER_SIZE as i32)?;
    out.extend_from_slice(&[0; 36]); // data_type, db_name, extents, session_error, regular, dim_info
    for value in [3, nx, ny, nz, 1, 1, 1, 1] {
        out.write_i16::<LittleEndian>(value)?;
    }
    out.extend_from_slice(&[0; 14]); // intent parameters and code
    out.write_i16::<LittleEndian>(datatype_code(voxel_type))?;
    out.write_i16::<LittleEndian>((voxel_type.size() * 8) as i16)?;
    out.write_i16::<LittleEndian>(0)?; // slice_start
    let [sx, sy, sz] = geometry.spacing;
    for value in [qfac, sx, sy, sz, 0.0, 0.0, 0.0, 0.0] {
        out.write_f32::<LittleEndian>(value as f32)?;
    }
    out.write_f32::<LittleEndian>(VOXEL_OFFSET as f32)?;
    out.write_f32::<LittleEndian>(1.0)?; // scl_slope
    out.write_f32::<LittleEndian>(0.0)?; // scl_inter
    out.write_i16::<LittleEndian>(0)?; // slice_end
    out.write_u8(0)?; // slice_code
    out.write_u8(NIFTI_UNITS_MM)?;
    out.extend_from_slice(&[0; 24]); // cal_max .. glmin
    let mut description = [0u8; 80];
    let text = concat!("dicom-segmentation ", env!("CARGO_PKG_VERSION"));
    description[..text.len()].copy_from_slice(text.as_bytes());
    out.extend_from_slice(&description);
    out.extend_from_slice(&[0; 24]); // aux_file
    out.write_i16::<LittleEndian>(NIFTI_XFORM_SCANNER_ANAT)?;
    out.write_i16::<LittleEndian>(NIFTI_XFORM_SCANNER_ANAT)?;
    for value in [qb, qc, qd, ras[0][3], ras[1][3], ras[2][3]] {
        out.write_f32::<LittleEndian>(value as f32)?;
    }
    for row in ras {
        for value in row {
            out.write_f32::<LittleEndian>(value as f32)?;
        }
    }
    out.extend_from_slice(&[0; 16]); // intent_name
    out.extend_from_slice(b"n+1\0");
    out.extend_from_slice(&[0; 4]); // no extensions
    debug_assert_eq!(out.len(), VOXEL_OFFSET);

    out.extend_from_slice(&volume.data.to_le_bytes());
    Ok(out)
}

/// Writes `volume` to `path`, gzip-compressed when `compress` is set
pub fn write_file(volume: &Volume, path: impl AsRef<Path>, compress: bool) -> Result<(), CodecError> {
    let bytes = encode(volume)?;
    let file = BufWriter::new(File::create(path.as_ref())?);
    if compress {
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&bytes)?;
        encoder.finish()?.flush()?;
    } else {
        let mut file = file;
        file.write_all(&bytes)?;
        file.flush()?;
    }
    Ok(())
}
