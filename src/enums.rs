use tracing::warn;

/// Order in which the slices of a series are stacked into a volume.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    /// Position along the slice normal, derived from Image Position (Patient)
    #[default]
    ImagePositionPatient,
    InstanceNumber,
    /// Keep the order in which the files were listed (sorted by path)
    None,
}

/// Format of the per-organ masks written to the output directory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Gzip-compressed NIfTI, the format the segmentation tool emits
    #[default]
    Nifti,
    /// NRRD with gzip encoding
    Nrrd,
}

impl OutputFormat {
    /// Parses the command-line token. Anything that is not recognised falls
    /// back to NIfTI.
    pub fn from_token(token: &str) -> Self {
        match token.to_ascii_lowercase().as_str() {
            "nrrd" => OutputFormat::Nrrd,
            "nifti" | "nii" => OutputFormat::Nifti,
            other => {
                warn!("Unknown output format `{other}`, writing NIfTI");
                OutputFormat::Nifti
            }
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            OutputFormat::Nifti => "NIFTI",
            OutputFormat::Nrrd => "NRRD",
        }
    }
}

/// Fast mode is disabled only by an exact, case-insensitive `false`.
pub fn parse_fast_flag(token: Option<&str>) -> bool {
    token.is_none_or(|value| !value.eq_ignore_ascii_case("false"))
}
