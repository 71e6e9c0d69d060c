//! NRRD volumes with an attached header

use std::{
    fs::File,
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use flate2::{Compression, read::MultiGzDecoder, write::GzEncoder};

use crate::{
    error::CodecError,
    volume::{Geometry, Volume, VoxelData, VoxelType},
};

const FORMAT: &str = "NRRD";

fn type_name(voxel_type: VoxelType) -> &'static str {
    match voxel_type {
        VoxelType::U8 => "uint8",
        VoxelType::I8 => "int8",
        VoxelType::U16 => "uint16",
        VoxelType::I16 => "int16",
        VoxelType::U32 => "uint32",
        VoxelType::I32 => "int32",
        VoxelType::F32 => "float",
        VoxelType::F64 => "double",
    }
}

fn parse_type(name: &str) -> Result<VoxelType, CodecError> {
    Ok(match name {
        "uchar" | "unsigned char" | "uint8" | "uint8_t" => VoxelType::U8,
        "signed char" | "int8" | "int8_t" => VoxelType::I8,
        "ushort" | "unsigned short" | "unsigned short int" | "uint16" | "uint16_t" => VoxelType::U16,
        "short" | "short int" | "signed short" | "signed short int" | "int16" | "int16_t" => {
            VoxelType::I16
        }
        "uint" | "unsigned int" | "uint32" | "uint32_t" => VoxelType::U32,
        "int" | "signed int" | "int32" | "int32_t" => VoxelType::I32,
        "float" => VoxelType::F32,
        "double" => VoxelType::F64,
        other => return Err(CodecError::UnsupportedVoxelType(format!("NRRD type `{other}`"))),
    })
}

fn format_vector(v: [f64; 3]) -> String {
    format!("({},{},{})", v[0], v[1], v[2])
}

fn parse_vector(text: &str) -> Result<[f64; 3], CodecError> {
    let inner = text
        .trim()
        .strip_prefix('(')
        .and_then(|rest| rest.strip_suffix(')'))
        .ok_or_else(|| CodecError::header(FORMAT, format!("malformed vector `{text}`")))?;
    let values: Vec<f64> = inner
        .split(',')
        .map(|value| value.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| CodecError::header(FORMAT, format!("malformed vector `{text}`")))?;
    <[f64; 3]>::try_from(values)
        .map_err(|_| CodecError::header(FORMAT, format!("expected 3 components in `{text}`")))
}

/// Header text for `volume`, including the blank line that ends it
pub fn header(volume: &Volume) -> String {
    let (nz, ny, nx) = volume.dim();
    let geometry = &volume.geometry;
    let directions: Vec<String> = (0..3)
        .map(|axis| format_vector(geometry.direction[axis].map(|c| c * geometry.spacing[axis])))
        .collect();

    format!(
        "NRRD0004\n\
         # Complete NRRD file format specification at:\n\
         # http://teem.sourceforge.net/nrrd/format.html\n\
         type: {}\n\
         dimension: 3\n\
         space: left-posterior-superior\n\
         sizes: {nx} {ny} {nz}\n\
         space directions: {}\n\
         kinds: domain domain domain\n\
         endian: little\n\
         encoding: gzip\n\
         space origin: {}\n\n",
        type_name(volume.voxel_type()),
        directions.join(" "),
        format_vector(geometry.origin),
    )
}

/// Writes `volume` as a gzip-encoded NRRD file
pub fn write_file(volume: &Volume, path: impl AsRef<Path>) -> Result<(), CodecError> {
    let mut file = BufWriter::new(File::create(path.as_ref())?);
    file.write_all(header(volume).as_bytes())?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(&volume.data.to_le_bytes())?;
    encoder.finish()?.flush()?;
    Ok(())
}

pub fn read_file(path: impl AsRef<Path>) -> Result<Volume, CodecError> {
    let mut raw = Vec::new();
    BufReader::new(File::open(path.as_ref())?).read_to_end(&mut raw)?;
    decode(&raw)
}

#[derive(Default)]
struct Fields {
    voxel_type: Option<VoxelType>,
    sizes: Option<[usize; 3]>,
    directions: Option<[[f64; 3]; 3]>,
    origin: Option<[f64; 3]>,
    ras: bool,
    big_endian: bool,
    gzip: bool,
}

pub fn decode(bytes: &[u8]) -> Result<Volume, CodecError> {
    if !bytes.starts_with(b"NRRD000") {
        return Err(CodecError::header(FORMAT, "missing NRRD magic"));
    }

    let mut fields = Fields::default();
    let mut position = 0;
    let mut first = true;
    loop {
        let end = bytes[position..]
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| CodecError::header(FORMAT, "header is not terminated by a blank line"))?;
        let line = String::from_utf8_lossy(&bytes[position..position + end]);
        let line = line.trim_end_matches('\r');
        position += end + 1;

        if first {
            first = false;
            continue;
        }
        if line.is_empty() {
            break;
        }
        if line.starts_with('#') {
            continue;
        }
        // Key/value pairs (`key:=value`) carry no geometry
        if line.contains(":=") {
            continue;
        }
        let Some((key, value)) = line.split_once(": ") else {
            return Err(CodecError::header(FORMAT, format!("malformed line `{line}`")));
        };
        parse_field(&mut fields, key.trim(), value.trim())?;
    }

    let voxel_type = fields
        .voxel_type
        .ok_or_else(|| CodecError::header(FORMAT, "missing `type` field"))?;
    let [nx, ny, nz] = fields
        .sizes
        .ok_or_else(|| CodecError::header(FORMAT, "missing `sizes` field"))?;

    let payload = &bytes[position..];
    let inflated;
    let payload = if fields.gzip {
        let mut buffer = Vec::new();
        MultiGzDecoder::new(payload).read_to_end(&mut buffer)?;
        inflated = buffer;
        inflated.as_slice()
    } else {
        payload
    };

    let data = VoxelData::from_bytes(voxel_type, (nz, ny, nx), payload, fields.big_endian)?;

    let mut affine = [[0.0; 4]; 3];
    let directions = fields.directions.unwrap_or(Geometry::default().direction);
    let origin = fields.origin.unwrap_or([0.0; 3]);
    for row in 0..3 {
        for axis in 0..3 {
            affine[row][axis] = directions[axis][row];
        }
        affine[row][3] = origin[row];
    }
    let geometry = if fields.ras {
        Geometry::from_ras_affine(&affine)
    } else {
        Geometry::from_affine(&affine)
    };

    Ok(Volume::new(data, geometry))
}

fn parse_field(fields: &mut Fields, key: &str, value: &str) -> Result<(), CodecError> {
    match key {
        "type" => fields.voxel_type = Some(parse_type(value)?),
        "dimension" => {
            if value != "3" {
                return Err(CodecError::header(FORMAT, format!("unsupported dimension {value}")));
            }
        }
        "sizes" => {
            let sizes: Vec<usize> = value
                .split_whitespace()
                .map(str::parse)
                .collect::<Result<_, _>>()
                .map_err(|_| CodecError::header(FORMAT, format!("malformed sizes `{value}`")))?;
            let sizes = <[usize; 3]>::try_from(sizes)
                .map_err(|_| CodecError::header(FORMAT, format!("expected 3 sizes in `{value}`")))?;
            fields.sizes = Some(sizes);
        }
        "space" => {
            fields.ras = match value {
                "left-posterior-superior" | "LPS" => false,
                "right-anterior-superior" | "RAS" => true,
                other => {
                    return Err(CodecError::header(FORMAT, format!("unsupported space `{other}`")));
                }
            };
        }
        "space directions" => {
            let vectors: Vec<[f64; 3]> = value
                .split_whitespace()
                .map(parse_vector)
                .collect::<Result<_, _>>()?;
            let vectors = <[[f64; 3]; 3]>::try_from(vectors)
                .map_err(|_| CodecError::header(FORMAT, "expected 3 space directions"))?;
            fields.directions = Some(vectors);
        }
        "space origin" => fields.origin = Some(parse_vector(value)?),
        "endian" => fields.big_endian = value == "big",
        "encoding" => {
            fields.gzip = match value {
                "raw" => false,
                "gzip" | "gz" => true,
                other => {
                    return Err(CodecError::header(FORMAT, format!("unsupported encoding `{other}`")));
                }
            };
        }
        "data file" | "datafile" => {
            return Err(CodecError::header(FORMAT, "detached data files are not supported"));
        }
        _ => {}
    }
    Ok(())
}
