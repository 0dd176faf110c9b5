//! External transcoding tool
//!
//! The pipeline needs exactly two things from ffmpeg: remux one HLS stream into
//! a local segment file, and concatenate segment files into the final container
//! with metadata. [`MediaTool`] captures that capability so fetch and merge can
//! be exercised without spawning processes.

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use thiserror::Error;
use tracing::debug;

/// Errors that can occur while running the external tool
#[derive(Debug, Error)]
pub enum ToolError {
    /// The tool could not be started
    #[error("Failed to spawn {}: {source}", binary.display())]
    Spawn { binary: PathBuf, source: io::Error },

    /// The tool ran but reported failure
    #[error("ffmpeg exited with {status}")]
    Failed { status: ExitStatus },
}

/// Transport+remux and concat capability of the external tool
pub trait MediaTool: Sync {
    /// Copies the stream at `source_url` into `dest` without re-encoding
    fn fetch_segment(&self, source_url: &str, dest: &Path) -> Result<(), ToolError>;

    /// Concatenates `inputs` in order into `dest`, attaching `metadata` tags
    fn concat(
        &self,
        inputs: &[PathBuf],
        metadata: &[(String, String)],
        dest: &Path,
    ) -> Result<(), ToolError>;
}

/// ffmpeg command line implementation of [`MediaTool`]
#[derive(Debug, Clone)]
pub struct FfmpegTool {
    binary: PathBuf,
}

impl Default for FfmpegTool {
    fn default() -> Self {
        Self::new()
    }
}

impl FfmpegTool {
    /// Uses the ffmpeg found next to the executable or on the PATH
    pub fn new() -> Self {
        Self {
            binary: ffmpeg_sidecar::paths::ffmpeg_path(),
        }
    }

    /// Uses a specific ffmpeg binary
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Checks if the configured ffmpeg binary can be executed
    pub fn is_installed(&self) -> bool {
        Command::new(&self.binary)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|status| status.success())
            .unwrap_or(false)
    }

    /// Arguments remuxing one HLS stream into a local file
    pub fn segment_args(source_url: &str, dest: &Path) -> Vec<OsString> {
        let mut args = Self::common_args();
        args.extend(["-i", source_url, "-codec", "copy"].map(OsString::from));
        args.push(dest.as_os_str().to_os_string());
        args
    }

    /// Arguments concatenating local segments into the final container
    pub fn concat_args(
        inputs: &[PathBuf],
        metadata: &[(String, String)],
        dest: &Path,
    ) -> Vec<OsString> {
        let mut concat = OsString::from("concat:");
        for (index, input) in inputs.iter().enumerate() {
            if index > 0 {
                concat.push("|");
            }
            concat.push(input.as_os_str());
        }

        let mut args = Self::common_args();
        args.push("-i".into());
        args.push(concat);
        for (key, value) in metadata {
            args.push("-metadata".into());
            args.push(format!("{key}={value}").into());
        }
        args.extend(["-c:v", "copy"].map(OsString::from));
        args.push(dest.as_os_str().to_os_string());
        args
    }

    /// Warnings only, overwrite destination
    fn common_args() -> Vec<OsString> {
        ["-loglevel", "warning", "-y"].map(OsString::from).to_vec()
    }

    fn run(&self, args: Vec<OsString>) -> Result<(), ToolError> {
        debug!(binary = %self.binary.display(), ?args, "running ffmpeg");

        let status = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .status()
            .map_err(|source| ToolError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        if !status.success() {
            return Err(ToolError::Failed { status });
        }
        Ok(())
    }
}

impl MediaTool for FfmpegTool {
    fn fetch_segment(&self, source_url: &str, dest: &Path) -> Result<(), ToolError> {
        self.run(Self::segment_args(source_url, dest))
    }

    fn concat(
        &self,
        inputs: &[PathBuf],
        metadata: &[(String, String)],
        dest: &Path,
    ) -> Result<(), ToolError> {
        self.run(Self::concat_args(inputs, metadata, dest))
    }
}
