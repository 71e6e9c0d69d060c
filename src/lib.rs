//! # DICOM segmentation pipeline
//!
//! This crate runs an external organ segmentation tool (TotalSegmentator by
//! default) on a DICOM series and exports the resulting per-organ masks.
//!
//! A run goes through three stages, each inside a private staging directory
//! that is removed when the run ends, whether it succeeded or not:
//!
//!  1. The DICOM slices of the input directory are stacked into one volume
//!     and written as gzip-compressed NIfTI.
//!  2. The segmentation tool is run on that volume as a blocking child
//!     process and writes one mask file per organ.
//!  3. Each mask is exported to the output directory, either copied as
//!     NIfTI or converted to NRRD.
//!
//! DICOM files are assumed to have the following attributes:
//!   - Images from one series (Series Instance UID); when a directory holds
//!     several series, the one with the most slices is used
//!   - No multiframe (always the first frame is used)
//!
//! Slices are parsed in parallel using rayon.
//!
//! If the tool succeeds but leaves no mask file behind, the run still
//! succeeds with an empty [`MaskSet`] and the staged directory contents are
//! reported in the [`RunSummary`].
//!
//! # Examples
//!
//! ## Segmenting a series into NRRD masks
//!
//! ```no_run
//! # use dicom_segmentation::{OutputFormat, Pipeline, PipelineConfig};
//! let mut config = PipelineConfig::new("dicom", "segmentations");
//! config.output_format = OutputFormat::Nrrd;
//! let summary = Pipeline::new(config)
//!     .run()
//!     .expect("should have segmented the series");
//! for organ in summary.masks.organs() {
//!     println!("{organ}");
//! }
//! ```
//!
//! ## Converting a mask by hand
//!
//! ```no_run
//! # use dicom_segmentation::codec::{self, FileFormat};
//! # use std::path::Path;
//! codec::reencode(Path::new("liver.nii.gz"), FileFormat::Nrrd, Path::new("liver.nrrd"))
//!     .expect("should have converted the mask");
//! ```

pub mod codec;
pub mod enums;
pub mod error;
pub mod materializer;
pub mod nifti;
pub mod nrrd;
pub mod pipeline;
pub mod segmenter;
pub mod volume;
pub mod volume_loader;

pub use enums::{OutputFormat, SortBy, parse_fast_flag};
pub use error::{CodecError, PipelineError, Result};
pub use materializer::{MaskSet, OrganMask};
pub use pipeline::{Pipeline, PipelineConfig, PipelineState, RunSummary, StagingArea};
pub use segmenter::Segmenter;
pub use volume::{Geometry, Volume, VoxelData, VoxelType};
