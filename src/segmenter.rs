use std::{
    ffi::{OsStr, OsString},
    path::Path,
    process::Command,
};

use tracing::{debug, info};

use crate::error::{PipelineError, Result};

pub const DEFAULT_PROGRAM: &str = "TotalSegmentator";

/// Runs the external segmentation tool as a blocking child process.
///
/// The tool is asked for one mask file per organ; the combined multi-label
/// output mode is never requested.
#[derive(Debug, Clone)]
pub struct Segmenter {
    program: OsString,
    launcher_args: Vec<OsString>,
    fast: bool,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM)
    }
}

impl Segmenter {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            launcher_args: Vec::new(),
            fast: false,
        }
    }

    /// Arguments placed between the program and the tool flags, for tools
    /// reached through a launcher such as `sh script` or `conda run`
    pub fn with_launcher_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.launcher_args = args.into_iter().map(|arg| arg.as_ref().to_os_string()).collect();
        self
    }

    pub fn fast(mut self, fast: bool) -> Self {
        self.fast = fast;
        self
    }

    pub fn command(&self, input: &Path, output_dir: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.launcher_args)
            .arg("-i")
            .arg(input)
            .arg("-o")
            .arg(output_dir);
        if self.fast {
            command.arg("--fast");
        }
        command
    }

    /// Runs the tool on `input`, writing masks to `output_dir`. Blocks until
    /// the tool exits; there is no timeout.
    ///
    /// # Errors
    ///
    /// [`PipelineError::ToolLaunch`] if the process could not be started,
    /// [`PipelineError::SegmentationFailed`] with the captured standard error
    /// if it exits unsuccessfully.
    pub fn invoke(&self, input: &Path, output_dir: &Path) -> Result<()> {
        let mut command = self.command(input, output_dir);
        info!("Running segmentation: {}", render(&command));

        let output = command.output().map_err(|source| PipelineError::ToolLaunch {
            program: self.program.to_string_lossy().into_owned(),
            source,
        })?;

        if !output.status.success() {
            return Err(PipelineError::SegmentationFailed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }

        info!("Segmentation finished");
        let stdout = String::from_utf8_lossy(&output.stdout);
        if !stdout.trim().is_empty() {
            info!("{}", stdout.trim_end());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            debug!("{}", stderr.trim_end());
        }
        Ok(())
    }
}

fn render(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(OsStr::to_string_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}
