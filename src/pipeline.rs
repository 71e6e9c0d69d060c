//! Pipeline controller: DICOM decode, segmentation, then mask export, all
//! inside a staging area that is removed when the run ends.

use std::{
    ffi::OsString,
    fs, io,
    path::{Path, PathBuf},
};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::{
    codec,
    enums::{OutputFormat, SortBy},
    error::{PipelineError, Result},
    materializer::{self, MaskSet},
    segmenter::{DEFAULT_PROGRAM, Segmenter},
};

const STAGED_VOLUME: &str = "input.nii.gz";
const STAGED_SEGMENTATIONS: &str = "segmentations";

/// Options of one run; fixed for its whole duration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub input_dicom_dir: PathBuf,
    pub output_dir: PathBuf,
    pub output_format: OutputFormat,
    pub fast_mode: bool,
    pub segmenter_program: PathBuf,
    pub segmenter_args: Vec<OsString>,
    /// Parent of the staging area; the system temp dir when unset
    pub staging_root: Option<PathBuf>,
    pub sort_by: SortBy,
}

impl PipelineConfig {
    pub fn new(input_dicom_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            input_dicom_dir: input_dicom_dir.into(),
            output_dir: output_dir.into(),
            output_format: OutputFormat::default(),
            fast_mode: true,
            segmenter_program: PathBuf::from(DEFAULT_PROGRAM),
            segmenter_args: Vec::new(),
            staging_root: None,
            sort_by: SortBy::default(),
        }
    }

    fn segmenter(&self) -> Segmenter {
        Segmenter::new(&self.segmenter_program)
            .with_launcher_args(&self.segmenter_args)
            .fast(self.fast_mode)
    }
}

/// Scratch directory of one run. Deleted recursively when dropped.
#[derive(Debug)]
pub struct StagingArea {
    dir: TempDir,
}

impl StagingArea {
    pub fn create(root: Option<&Path>) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("dicom-seg-");
        let dir = match root {
            Some(root) => builder.tempdir_in(root)?,
            None => builder.tempdir()?,
        };
        debug!("Created staging area {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn volume_path(&self) -> PathBuf {
        self.path().join(STAGED_VOLUME)
    }

    pub fn segmentation_dir(&self) -> PathBuf {
        self.path().join(STAGED_SEGMENTATIONS)
    }

    /// Deletes the staging area, reporting failures that a drop would hide
    pub fn close(self) -> io::Result<()> {
        let path = self.path().to_path_buf();
        self.dir.close()?;
        debug!("Removed staging area {}", path.display());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    ValidatingInput,
    Decoding,
    Segmenting,
    Materializing,
    Done,
    Failed,
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub organs_written: usize,
    pub masks: MaskSet,
    pub output_dir: PathBuf,
    pub output_format: OutputFormat,
    pub fast_mode: bool,
    /// Staged directory contents, set only when no mask was found
    pub staged_listing: Option<Vec<PathBuf>>,
}

impl RunSummary {
    /// The tool succeeded but produced no mask files
    pub fn is_degraded(&self) -> bool {
        self.staged_listing.is_some()
    }
}

#[derive(Debug)]
pub struct Pipeline {
    config: PipelineConfig,
    state: PipelineState,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            state: PipelineState::Idle,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    fn transition(&mut self, state: PipelineState) {
        debug!("Pipeline {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    /// Runs every stage once. Any error is returned as raised by the stage
    /// that failed; the staging area is removed either way.
    pub fn run(&mut self) -> Result<RunSummary> {
        let outcome = self.run_stages();
        match &outcome {
            Ok(_) => self.transition(PipelineState::Done),
            Err(_) => self.transition(PipelineState::Failed),
        }
        outcome
    }

    fn run_stages(&mut self) -> Result<RunSummary> {
        self.transition(PipelineState::ValidatingInput);
        self.validate()?;

        let staging = StagingArea::create(self.config.staging_root.as_deref())?;
        let outcome = self.run_staged(&staging);
        if let Err(err) = staging.close() {
            warn!("Could not remove staging area: {err}");
        }
        outcome
    }

    fn validate(&self) -> Result<()> {
        let input = &self.config.input_dicom_dir;
        if !input.is_dir() {
            return Err(PipelineError::InputNotFound(input.clone()));
        }
        fs::create_dir_all(&self.config.output_dir)?;
        Ok(())
    }

    fn run_staged(&mut self, staging: &StagingArea) -> Result<RunSummary> {
        self.transition(PipelineState::Decoding);
        let staged = codec::decode_series(
            &self.config.input_dicom_dir,
            &staging.volume_path(),
            self.config.sort_by,
        )?;

        self.transition(PipelineState::Segmenting);
        let segmentation_dir = staging.segmentation_dir();
        self.config.segmenter().invoke(&staged.path, &segmentation_dir)?;

        self.transition(PipelineState::Materializing);
        let materialized = materializer::materialize(
            &segmentation_dir,
            &self.config.output_dir,
            self.config.output_format,
        )?;

        let summary = RunSummary {
            organs_written: materialized.written,
            masks: materialized.masks,
            output_dir: self.config.output_dir.clone(),
            output_format: self.config.output_format,
            fast_mode: self.config.fast_mode,
            staged_listing: materialized.staged_listing,
        };
        if summary.is_degraded() {
            warn!("Segmentation produced no mask files; nothing was written");
        } else {
            info!(
                "Saved {} segmentation files as {}",
                summary.organs_written,
                summary.output_format.name()
            );
        }
        info!("Output directory: {}", summary.output_dir.display());
        Ok(summary)
    }
}
