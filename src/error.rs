use std::{io, path::PathBuf, process::ExitStatus};

use thiserror::Error;

use crate::volume_loader::VolumeLoaderError;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Failures of a single pipeline run. Each one is fatal to the run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Input directory does not exist: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("No DICOM series found in {}", .0.display())]
    NoSeriesFound(PathBuf),

    #[error("Could not launch segmentation tool `{program}`: {source}")]
    ToolLaunch {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Segmentation tool failed ({status}):\n{stderr}")]
    SegmentationFailed { status: ExitStatus, stderr: String },

    #[error("Codec error on {subject}: {source}")]
    Codec {
        /// File or organ the failure refers to
        subject: String,
        #[source]
        source: CodecError,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl PipelineError {
    pub(crate) fn codec(subject: impl Into<String>, source: impl Into<CodecError>) -> Self {
        PipelineError::Codec {
            subject: subject.into(),
            source: source.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("DICOM series error: {0}")]
    Series(#[from] VolumeLoaderError),

    #[error("Unrecognized volume file name: {}", .0.display())]
    UnknownFormat(PathBuf),

    #[error("Invalid {format} header: {reason}")]
    InvalidHeader {
        format: &'static str,
        reason: String,
    },

    #[error("Unsupported voxel type: {0}")]
    UnsupportedVoxelType(String),

    #[error("Volume of {0:?} voxels does not fit in memory")]
    TooLarge((usize, usize, usize)),

    #[error("Voxel data truncated: expected {expected} bytes, found {found}")]
    Truncated { expected: usize, found: usize },

    #[error("Voxel array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

impl CodecError {
    pub(crate) fn header(format: &'static str, reason: impl Into<String>) -> Self {
        CodecError::InvalidHeader {
            format,
            reason: reason.into(),
        }
    }
}
