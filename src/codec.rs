//! Volume codec adapter: DICOM series decoding and volume file conversion.

use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::{debug, info};

use crate::{
    enums::{OutputFormat, SortBy},
    error::{CodecError, PipelineError, Result},
    nifti, nrrd,
    volume::{Geometry, Volume},
    volume_loader::{VolumeLoader, VolumeLoaderError},
};

/// On-disk volume formats, identified by file name suffix
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    NiftiGz,
    Nifti,
    Nrrd,
}

impl FileFormat {
    pub fn extension(self) -> &'static str {
        match self {
            FileFormat::NiftiGz => ".nii.gz",
            FileFormat::Nifti => ".nii",
            FileFormat::Nrrd => ".nrrd",
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        [FileFormat::NiftiGz, FileFormat::Nifti, FileFormat::Nrrd]
            .into_iter()
            .find(|format| name.ends_with(format.extension()))
    }
}

impl From<OutputFormat> for FileFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Nifti => FileFormat::NiftiGz,
            OutputFormat::Nrrd => FileFormat::Nrrd,
        }
    }
}

/// A volume written to disk. Only its shape and placement stay in memory.
#[derive(Debug, Clone)]
pub struct StagedVolume {
    pub path: PathBuf,
    /// Voxel counts as (z, y, x)
    pub dim: (usize, usize, usize),
    pub geometry: Geometry,
}

/// Reads the DICOM series in `series_dir` and writes it to `dest`, in the
/// format named by its suffix.
pub fn decode_series(series_dir: &Path, dest: &Path, sort_by: SortBy) -> Result<StagedVolume> {
    info!("Reading DICOM directory {}", series_dir.display());

    let volume = VolumeLoader::load_from_directory(series_dir, sort_by).map_err(|err| match err {
        VolumeLoaderError::NoSeriesFound(dir) => PipelineError::NoSeriesFound(dir),
        other => PipelineError::codec(series_dir.display().to_string(), other),
    })?;
    let (depth, height, width) = volume.dim();
    debug!("Volume is {width}x{height}x{depth}, spacing {:?}", volume.geometry.spacing);

    write_volume(&volume, dest).map_err(|err| PipelineError::codec(dest.display().to_string(), err))?;
    info!("Wrote volume {}", dest.display());

    Ok(StagedVolume {
        path: dest.to_path_buf(),
        dim: volume.dim(),
        geometry: volume.geometry,
    })
}

fn format_of(path: &Path) -> std::result::Result<FileFormat, CodecError> {
    FileFormat::from_path(path).ok_or_else(|| CodecError::UnknownFormat(path.to_path_buf()))
}

pub fn read_volume(path: &Path) -> std::result::Result<Volume, CodecError> {
    match format_of(path)? {
        FileFormat::NiftiGz | FileFormat::Nifti => nifti::read_file(path),
        FileFormat::Nrrd => nrrd::read_file(path),
    }
}

/// Writes `volume` in the format named by the suffix of `dest`
pub fn write_volume(volume: &Volume, dest: &Path) -> std::result::Result<(), CodecError> {
    match format_of(dest)? {
        FileFormat::NiftiGz => nifti::write_file(volume, dest, true),
        FileFormat::Nifti => nifti::write_file(volume, dest, false),
        FileFormat::Nrrd => nrrd::write_file(volume, dest),
    }
}

/// Rewrites the volume at `source` to `dest` in `target` format. Bytes are
/// copied verbatim when the source is already in that format.
pub fn reencode(source: &Path, target: FileFormat, dest: &Path) -> std::result::Result<(), CodecError> {
    if format_of(source)? == target {
        fs::copy(source, dest)?;
        return Ok(());
    }

    let volume = read_volume(source)?;
    match target {
        FileFormat::NiftiGz => nifti::write_file(&volume, dest, true),
        FileFormat::Nifti => nifti::write_file(&volume, dest, false),
        FileFormat::Nrrd => nrrd::write_file(&volume, dest),
    }
}
