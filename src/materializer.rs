//! Discovery and export of the per-organ masks written by the segmentation
//! tool.
//!
//! Discovery is two-phase: the whole staged directory is searched for
//! [`PRIMARY_SUFFIX`] files, and only if there are none is it searched again
//! for [`FALLBACK_SUFFIX`] files. Results of the two phases are never merged.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use tracing::{info, warn};

use crate::{
    codec::{self, FileFormat},
    enums::OutputFormat,
    error::{PipelineError, Result},
};

pub const PRIMARY_SUFFIX: &str = ".nii.gz";
pub const FALLBACK_SUFFIX: &str = ".nii";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrganMask {
    /// File name with the matched suffix removed, e.g. `liver`
    pub organ: String,
    /// Where the mask was written
    pub path: PathBuf,
}

/// Masks exported by one run. The tool is trusted not to emit the same organ
/// twice; if it does, the later file overwrites the earlier output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaskSet {
    pub masks: Vec<OrganMask>,
}

impl MaskSet {
    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }

    pub fn organs(&self) -> impl Iterator<Item = &str> {
        self.masks.iter().map(|mask| mask.organ.as_str())
    }
}

/// Mask files found in the staged directory, all matching `suffix`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub suffix: &'static str,
    pub files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct Materialized {
    pub masks: MaskSet,
    pub written: usize,
    /// Contents of the staged directory when no mask was found
    pub staged_listing: Option<Vec<PathBuf>>,
}

fn entries(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut paths = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir
            .map(|entry| entry.map(|entry| entry.path()))
            .collect::<io::Result<Vec<_>>>()?,
        Err(err) if err.kind() == io::ErrorKind::NotFound => Vec::new(),
        Err(err) => return Err(err),
    };
    paths.sort();
    Ok(paths)
}

fn matches_suffix(path: &Path, suffix: &str) -> bool {
    path.is_file()
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| !name.starts_with('.') && name.len() > suffix.len() && name.ends_with(suffix))
}

/// Finds the mask files in `staged_dir`, or `None` when neither suffix
/// matches anything. A missing directory counts as empty.
pub fn discover(staged_dir: &Path) -> io::Result<Option<Discovered>> {
    let paths = entries(staged_dir)?;
    for suffix in [PRIMARY_SUFFIX, FALLBACK_SUFFIX] {
        let files: Vec<PathBuf> = paths
            .iter()
            .filter(|path| matches_suffix(path, suffix))
            .cloned()
            .collect();
        if !files.is_empty() {
            return Ok(Some(Discovered { suffix, files }));
        }
    }
    Ok(None)
}

/// Organ key of a mask file: its name without `suffix`
pub fn organ_key(path: &Path, suffix: &str) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    name.strip_suffix(suffix).map(str::to_string)
}

/// Exports every mask in `staged_dir` to `output_dir` in `format`.
///
/// Stops at the first mask that cannot be written; masks already written stay
/// in place.
pub fn materialize(staged_dir: &Path, output_dir: &Path, format: OutputFormat) -> Result<Materialized> {
    let Some(Discovered { suffix, files }) = discover(staged_dir)? else {
        let listing = entries(staged_dir)?;
        warn!("No segmentation files found in {}", staged_dir.display());
        warn!("Staged directory contents:");
        for item in &listing {
            warn!("  - {}", item.display());
        }
        return Ok(Materialized {
            staged_listing: Some(listing),
            ..Materialized::default()
        });
    };

    info!("Saving {} segmentation files as {}", files.len(), format.name());
    let target = FileFormat::from(format);
    let mut masks = MaskSet::default();

    for file in files {
        let Some(organ) = organ_key(&file, suffix) else {
            continue;
        };
        let dest = output_dir.join(format!("{organ}{}", target.extension()));

        codec::reencode(&file, target, &dest).map_err(|err| PipelineError::codec(organ.clone(), err))?;
        info!("Wrote {}", dest.display());

        masks.masks.push(OrganMask { organ, path: dest });
    }

    Ok(Materialized {
        written: masks.len(),
        masks,
        staged_listing: None,
    })
}
