//! Merging of downloaded parts
//!
//! Concatenates the part files of one episode into the final container and
//! tags it with the episode's metadata. The output is written to a hidden
//! staging file next to its destination and renamed into place, so the
//! destination never holds a truncated file.

use crate::catalog::Episode;
use crate::tool::{MediaTool, ToolError};
use chrono::Local;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const SHOW_NAME: &str = "South Park";
const AUTHOR: &str = "The South Park Team";

/// Errors that can occur while merging
#[derive(Debug, Error)]
pub enum MergeError {
    /// Some part files were never written
    #[error("Missing downloaded part(s) {indices:?}")]
    MissingParts { indices: Vec<usize> },

    /// The external tool failed to concatenate the parts
    #[error("Failed to merge parts: {0}")]
    Tool(#[from] ToolError),

    /// Moving the merged file into place failed
    #[error("Failed to write {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Parts of one episode ready to be joined
#[derive(Debug, Clone)]
pub struct MergeRequest {
    /// Part files in playback order
    pub parts: Vec<PathBuf>,
    pub episode: Episode,
    /// Final destination
    pub output: PathBuf,
}

/// Container tags describing an episode, in the order they are passed on
pub fn metadata_tags(episode: &Episode) -> Vec<(String, String)> {
    let year = episode
        .air_date
        .with_timezone(&Local)
        .format("%Y")
        .to_string();

    [
        (
            "title",
            format!(
                "{} (S{} E{})",
                episode.title, episode.season, episode.episode_in_season
            ),
        ),
        ("description", episode.description.clone()),
        ("comment", episode.description.clone()),
        ("year", year),
        ("track", episode.episode_in_season.clone()),
        ("synopsis", episode.short_description.clone()),
        ("show", SHOW_NAME.to_string()),
        ("episode_id", episode.episode_number.clone()),
        ("album", episode.season.clone()),
        ("author", AUTHOR.to_string()),
    ]
    .into_iter()
    .map(|(key, value)| (key.to_string(), escape_tag(&value)))
    .collect()
}

fn escape_tag(value: &str) -> String {
    value.replace('\n', "\\n").replace('\r', "\\r")
}

/// Hidden sibling of `output` keeping its extension
fn staging_path(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "episode.mp4".to_string());
    output.with_file_name(format!(".{}.{}", ulid::Ulid::new(), name))
}

fn remove_quietly(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not remove file"),
    }
}

/// Joins the parts of `request` into its output file
///
/// Part files are consumed: they are removed on success as well as on every
/// failure.
///
/// # Errors
///
/// [`MergeError::MissingParts`] when a part file does not exist, before the
/// tool is run. [`MergeError::Tool`] or [`MergeError::Io`] when producing the
/// output failed; no output file is left behind in either case.
pub fn merge<T: MediaTool + ?Sized>(request: MergeRequest, tool: &T) -> Result<PathBuf, MergeError> {
    let missing: Vec<usize> = request
        .parts
        .iter()
        .enumerate()
        .filter(|(_, part)| !part.is_file())
        .map(|(index, _)| index)
        .collect();

    if !missing.is_empty() {
        request.parts.iter().for_each(|part| remove_quietly(part));
        return Err(MergeError::MissingParts { indices: missing });
    }

    info!(
        parts = request.parts.len(),
        output = %request.output.display(),
        "merging parts"
    );

    let staging = staging_path(&request.output);
    let tags = metadata_tags(&request.episode);

    let result = tool
        .concat(&request.parts, &tags, &staging)
        .map_err(MergeError::from)
        .and_then(|()| {
            fs::rename(&staging, &request.output).map_err(|source| MergeError::Io {
                path: request.output.clone(),
                source,
            })
        });

    if result.is_err() {
        remove_quietly(&staging);
    }
    request.parts.iter().for_each(|part| remove_quietly(part));

    result.map(|()| request.output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::episode;
    use crate::tool::testing::FakeTool;

    fn write_parts(dir: &Path, indices: &[usize]) -> Vec<PathBuf> {
        let parts: Vec<PathBuf> = (0..3).map(|i| dir.join(format!("ep--{i}.ts"))).collect();
        for &index in indices {
            fs::write(&parts[index], format!("part {index}")).unwrap();
        }
        parts
    }

    fn entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_merge_joins_parts_and_removes_them() {
        let temp = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let tool = FakeTool::default();

        let parts = write_parts(temp.path(), &[0, 1, 2]);
        let output = out.path().join("S01E01 - Pilot.mp4");
        let request = MergeRequest {
            parts: parts.clone(),
            episode: episode(1, 1),
            output: output.clone(),
        };

        let merged = merge(request, &tool).unwrap();

        assert_eq!(merged, output);
        assert_eq!(entries(out.path()), vec!["S01E01 - Pilot.mp4"]);
        assert_eq!(
            fs::read_to_string(&output).unwrap(),
            "part 0\npart 1\npart 2\n"
        );
        assert!(entries(temp.path()).is_empty());

        let concats = tool.concats.lock().unwrap();
        assert_eq!(concats.len(), 1);
        assert_eq!(concats[0].0, parts);
        assert_ne!(concats[0].2, output);
        assert!(concats[0].2.to_string_lossy().ends_with(".S01E01 - Pilot.mp4"));
    }

    #[test]
    fn test_missing_part_fails_without_output() {
        let temp = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let tool = FakeTool::default();

        let request = MergeRequest {
            parts: write_parts(temp.path(), &[0, 2]),
            episode: episode(1, 1),
            output: out.path().join("episode.mp4"),
        };

        match merge(request, &tool) {
            Err(MergeError::MissingParts { indices }) => assert_eq!(indices, vec![1]),
            other => panic!("expected missing parts, got {:?}", other),
        }
        assert!(entries(out.path()).is_empty());
        assert!(entries(temp.path()).is_empty());
        assert!(tool.concats.lock().unwrap().is_empty());
    }

    #[test]
    fn test_tool_failure_leaves_no_output() {
        let temp = tempfile::tempdir().unwrap();
        let out = tempfile::tempdir().unwrap();
        let tool = FakeTool {
            fail_concat: true,
            ..Default::default()
        };

        let request = MergeRequest {
            parts: write_parts(temp.path(), &[0, 1, 2]),
            episode: episode(1, 1),
            output: out.path().join("episode.mp4"),
        };

        assert!(matches!(merge(request, &tool), Err(MergeError::Tool(_))));
        assert!(entries(out.path()).is_empty());
        assert!(entries(temp.path()).is_empty());
    }

    #[test]
    fn test_metadata_tags() {
        let mut ep = episode(19, 8);
        ep.title = "Sponsored Content".to_string();
        ep.description = "Line one\nLine two\r".to_string();
        ep.episode_number = "1908".to_string();

        let tags = metadata_tags(&ep);
        let keys: Vec<&str> = tags.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "title",
                "description",
                "comment",
                "year",
                "track",
                "synopsis",
                "show",
                "episode_id",
                "album",
                "author"
            ]
        );

        let get = |key: &str| {
            tags.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
                .unwrap()
        };
        assert_eq!(get("title"), "Sponsored Content (S19 E08)");
        assert_eq!(get("description"), "Line one\\nLine two\\r");
        assert_eq!(get("comment"), get("description"));
        assert_eq!(get("track"), "08");
        assert_eq!(get("album"), "19");
        assert_eq!(get("episode_id"), "1908");
        assert_eq!(get("show"), "South Park");
        assert_eq!(get("author"), "The South Park Team");
        assert_eq!(get("year").len(), 4);
    }
}
