use byteorder::{BigEndian, ByteOrder, LittleEndian};
use ndarray::Array3;

use crate::error::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoxelType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    F32,
    F64,
}

impl VoxelType {
    /// Size of one voxel in bytes
    pub fn size(self) -> usize {
        match self {
            VoxelType::U8 | VoxelType::I8 => 1,
            VoxelType::U16 | VoxelType::I16 => 2,
            VoxelType::U32 | VoxelType::I32 | VoxelType::F32 => 4,
            VoxelType::F64 => 8,
        }
    }
}

/// Voxel array laid out as (depth, height, width), i.e. (z, y, x), so the
/// x index varies fastest in memory.
#[derive(Debug, Clone, PartialEq)]
pub enum VoxelData {
    U8(Array3<u8>),
    I8(Array3<i8>),
    U16(Array3<u16>),
    I16(Array3<i16>),
    U32(Array3<u32>),
    I32(Array3<i32>),
    F32(Array3<f32>),
    F64(Array3<f64>),
}

macro_rules! with_array {
    ($data:expr, $array:ident => $body:expr) => {
        match $data {
            VoxelData::U8($array) => $body,
            VoxelData::I8($array) => $body,
            VoxelData::U16($array) => $body,
            VoxelData::I16($array) => $body,
            VoxelData::U32($array) => $body,
            VoxelData::I32($array) => $body,
            VoxelData::F32($array) => $body,
            VoxelData::F64($array) => $body,
        }
    };
}

macro_rules! decode_as {
    ($variant:ident, $ty:ty, $read:ident, $dim:expr, $bytes:expr, $big_endian:expr) => {{
        let mut values = vec![<$ty>::default(); $bytes.len() / std::mem::size_of::<$ty>()];
        if $big_endian {
            BigEndian::$read($bytes, &mut values);
        } else {
            LittleEndian::$read($bytes, &mut values);
        }
        VoxelData::$variant(Array3::from_shape_vec($dim, values)?)
    }};
}

macro_rules! encode_le {
    ($array:expr, $write:ident, $size:expr) => {{
        let values: Vec<_> = $array.iter().copied().collect();
        let mut bytes = vec![0u8; values.len() * $size];
        LittleEndian::$write(&values, &mut bytes);
        bytes
    }};
}

impl VoxelData {
    pub fn dim(&self) -> (usize, usize, usize) {
        with_array!(self, array => array.dim())
    }

    pub fn len(&self) -> usize {
        with_array!(self, array => array.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn voxel_type(&self) -> VoxelType {
        match self {
            VoxelData::U8(_) => VoxelType::U8,
            VoxelData::I8(_) => VoxelType::I8,
            VoxelData::U16(_) => VoxelType::U16,
            VoxelData::I16(_) => VoxelType::I16,
            VoxelData::U32(_) => VoxelType::U32,
            VoxelData::I32(_) => VoxelType::I32,
            VoxelData::F32(_) => VoxelType::F32,
            VoxelData::F64(_) => VoxelType::F64,
        }
    }

    /// Decodes `dim.0 * dim.1 * dim.2` voxels of `voxel_type` from `bytes`.
    /// Trailing bytes are ignored.
    pub fn from_bytes(
        voxel_type: VoxelType,
        dim: (usize, usize, usize),
        bytes: &[u8],
        big_endian: bool,
    ) -> Result<Self, CodecError> {
        let expected = dim
            .0
            .checked_mul(dim.1)
            .and_then(|n| n.checked_mul(dim.2))
            .and_then(|n| n.checked_mul(voxel_type.size()))
            .ok_or(CodecError::TooLarge(dim))?;
        if bytes.len() < expected {
            return Err(CodecError::Truncated {
                expected,
                found: bytes.len(),
            });
        }
        let bytes = &bytes[..expected];

        let data = match voxel_type {
            VoxelType::U8 => VoxelData::U8(Array3::from_shape_vec(dim, bytes.to_vec())?),
            VoxelType::I8 => VoxelData::I8(Array3::from_shape_vec(
                dim,
                bytes.iter().map(|&b| b as i8).collect(),
            )?),
            VoxelType::U16 => decode_as!(U16, u16, read_u16_into, dim, bytes, big_endian),
            VoxelType::I16 => decode_as!(I16, i16, read_i16_into, dim, bytes, big_endian),
            VoxelType::U32 => decode_as!(U32, u32, read_u32_into, dim, bytes, big_endian),
            VoxelType::I32 => decode_as!(I32, i32, read_i32_into, dim, bytes, big_endian),
            VoxelType::F32 => decode_as!(F32, f32, read_f32_into, dim, bytes, big_endian),
            VoxelType::F64 => decode_as!(F64, f64, read_f64_into, dim, bytes, big_endian),
        };
        Ok(data)
    }

    /// Little-endian voxel bytes, x fastest
    pub fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            VoxelData::U8(array) => array.iter().copied().collect(),
            VoxelData::I8(array) => array.iter().map(|&v| v as u8).collect(),
            VoxelData::U16(array) => encode_le!(array, write_u16_into, 2),
            VoxelData::I16(array) => encode_le!(array, write_i16_into, 2),
            VoxelData::U32(array) => encode_le!(array, write_u32_into, 4),
            VoxelData::I32(array) => encode_le!(array, write_i32_into, 4),
            VoxelData::F32(array) => encode_le!(array, write_f32_into, 4),
            VoxelData::F64(array) => encode_le!(array, write_f64_into, 8),
        }
    }

    /// Applies a linear intensity mapping, producing float voxels
    pub fn rescaled(&self, slope: f32, intercept: f32) -> VoxelData {
        with_array!(self, array => VoxelData::F32(array.mapv(|v| v as f32 * slope + intercept)))
    }
}

/// Placement of the voxel grid in LPS patient space, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    /// Voxel size along x, y, z
    pub spacing: [f64; 3],
    /// Position of the centre of voxel (0, 0, 0)
    pub origin: [f64; 3],
    /// Unit vector of each voxel axis: `direction[0]` is the x axis
    pub direction: [[f64; 3]; 3],
}

impl Default for Geometry {
    fn default() -> Self {
        Self {
            spacing: [1.0; 3],
            origin: [0.0; 3],
            direction: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
        }
    }
}

impl Geometry {
    /// Rows of the 3x4 voxel-to-LPS affine
    pub fn affine(&self) -> [[f64; 4]; 3] {
        let mut affine = [[0.0; 4]; 3];
        for (row, out) in affine.iter_mut().enumerate() {
            for axis in 0..3 {
                out[axis] = self.direction[axis][row] * self.spacing[axis];
            }
            out[3] = self.origin[row];
        }
        affine
    }

    /// Inverse of [`Geometry::affine`]. A zero-length column keeps unit
    /// spacing and the matching canonical axis.
    pub fn from_affine(affine: &[[f64; 4]; 3]) -> Self {
        let mut geometry = Geometry::default();
        for axis in 0..3 {
            let column = [affine[0][axis], affine[1][axis], affine[2][axis]];
            let length = norm(column);
            if length > f64::EPSILON {
                geometry.spacing[axis] = length;
                geometry.direction[axis] = column.map(|c| c / length);
            }
        }
        geometry.origin = [affine[0][3], affine[1][3], affine[2][3]];
        geometry
    }

    /// Same affine expressed in RAS space, as NIfTI stores it
    pub fn ras_affine(&self) -> [[f64; 4]; 3] {
        flip_lps_ras(self.affine())
    }

    pub fn from_ras_affine(affine: &[[f64; 4]; 3]) -> Self {
        Self::from_affine(&flip_lps_ras(*affine))
    }

    pub fn approx_eq(&self, other: &Geometry, tolerance: f64) -> bool {
        let close = |a: &[f64; 3], b: &[f64; 3]| a.iter().zip(b).all(|(x, y)| (x - y).abs() <= tolerance);
        close(&self.spacing, &other.spacing)
            && close(&self.origin, &other.origin)
            && (0..3).all(|axis| close(&self.direction[axis], &other.direction[axis]))
    }
}

fn flip_lps_ras(mut affine: [[f64; 4]; 3]) -> [[f64; 4]; 3] {
    for row in affine.iter_mut().take(2) {
        for value in row.iter_mut() {
            *value = -*value;
        }
    }
    affine
}

pub(crate) fn norm(v: [f64; 3]) -> f64 {
    (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt()
}

pub(crate) fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub(crate) fn dot(a: [f64; 3], b: [f64; 3]) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// A 3D image with its placement in patient space
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    pub data: VoxelData,
    pub geometry: Geometry,
}

impl Volume {
    pub fn new(data: VoxelData, geometry: Geometry) -> Self {
        Self { data, geometry }
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get a reference to the underlying data
    pub fn data(&self) -> &VoxelData {
        &self.data
    }

    pub fn voxel_type(&self) -> VoxelType {
        self.data.voxel_type()
    }
}
