//! Download session management
//!
//! This module provides the RAII-based temporary directory shared by all
//! downloads of one run. Part files live inside it and the whole directory is
//! removed when the session is dropped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Temporary working directory of one run
#[derive(Debug)]
pub struct Session {
    dir: PathBuf,
}

impl Session {
    /// Creates a uniquely named session directory
    ///
    /// The directory is created below `root`, or below the system's temporary
    /// directory when no root is given. Its name uses a ULID so concurrent runs
    /// never share part files.
    ///
    /// Part paths are joined with `|` for ffmpeg's concat input, so a root
    /// containing `|` is rejected with [`io::ErrorKind::InvalidInput`].
    pub fn create(root: Option<&Path>) -> io::Result<Self> {
        let root = match root {
            Some(root) => root.to_path_buf(),
            None => std::env::temp_dir(),
        };
        if root.to_string_lossy().contains('|') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("temporary directory {} must not contain '|'", root.display()),
            ));
        }
        fs::create_dir_all(&root)?;

        let dir = root.join(format!(".parkdl-{}", ulid::Ulid::new()));
        fs::create_dir(&dir)?;
        debug!(dir = %dir.display(), "session created");

        Ok(Self { dir })
    }

    /// Path of the session directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Temporary file of one media part
    ///
    /// Keyed by the episode id and the part's position in the feed, never by
    /// completion order.
    pub fn part_path(&self, episode_id: &str, part_index: usize) -> PathBuf {
        self.dir.join(format!("{}--{}.ts", episode_id, part_index))
    }

    /// Removes whatever part files of an episode exist
    pub fn discard_parts(&self, episode_id: &str, part_count: usize) {
        for index in 0..part_count {
            let path = self.part_path(episode_id, index);
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed part"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "could not remove part"),
            }
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Silently ignore errors during cleanup
        let _ = fs::remove_dir_all(&self.dir);
    }
}
