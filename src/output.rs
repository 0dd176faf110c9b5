use crate::catalog::Episode;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Appended when the output template names an existing directory
pub const DIRECTORY_TEMPLATE: &str = "Season {season}/{episode} - {title}.mp4";

/// Errors that can occur while preparing output paths
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("Failed to create directory {}: {source}", path.display())]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("Output path {} is a directory", .0.display())]
    IsDirectory(PathBuf),
}

/// Sanitizes a string for use in filenames by replacing problematic characters
///
/// Replaces characters that are invalid or problematic in filenames across platforms:
/// - Path separators: / \
/// - Reserved characters: : * ? " < > |
/// - Control characters
///
/// Leading and trailing whitespace and dots are trimmed.
pub fn sanitize_filename(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();

    sanitized
        .trim_matches(|c: char| c.is_whitespace() || c == '.')
        .to_string()
}

/// Expands an output template for one episode
///
/// Supported placeholders:
/// - `{season}` or `{season:NN}` - Season as listed ("01"), or zero-padded to NN digits
/// - `{episode}` or `{episode:NN}` - Episode within the season, same rules
/// - `{number}` - Global episode number ("1908")
/// - `{title}` - Episode title (sanitized)
///
/// ```
/// # use parkdl::expand_template;
/// # use parkdl::Episode;
/// # fn show(episode: &Episode) {
/// let path = expand_template("S{season:02}E{episode:02} - {title}.mp4", episode);
/// # }
/// ```
pub fn expand_template(template: &str, episode: &Episode) -> String {
    let mut result = replace_with_padding(
        template,
        "season",
        &episode.season,
        episode.season_index(),
    );
    result = replace_with_padding(
        &result,
        "episode",
        &episode.episode_in_season,
        episode.episode_index(),
    );
    result = result.replace("{number}", &episode.episode_number);
    result.replace("{title}", &sanitize_filename(&episode.title))
}

/// Replaces `{name:NN}` with the zero-padded value and `{name}` with the listed text
fn replace_with_padding(text: &str, name: &str, listed: &str, value: u32) -> String {
    let mut result = text.to_string();

    let pattern_start = format!("{{{name}:");
    let mut search_from = 0;
    while let Some(offset) = result[search_from..].find(&pattern_start) {
        let start = search_from + offset;
        let Some(end) = result[start..].find('}') else {
            break;
        };
        let full_pattern = result[start..start + end + 1].to_string();
        let padding = &full_pattern[pattern_start.len()..full_pattern.len() - 1];

        match padding.parse::<usize>() {
            Ok(width) => {
                let formatted = format!("{:0width$}", value, width = width);
                result = result.replace(&full_pattern, &formatted);
                search_from = start + formatted.len();
            }
            Err(_) => search_from = start + full_pattern.len(),
        }
    }

    result.replace(&format!("{{{name}}}"), listed)
}

/// Final file path of an episode
///
/// When the expanded template is an existing directory the episode is placed
/// inside it using [`DIRECTORY_TEMPLATE`].
pub fn output_path(template: &str, episode: &Episode) -> PathBuf {
    let path = PathBuf::from(expand_template(template, episode));
    if path.is_dir() {
        path.join(expand_template(DIRECTORY_TEMPLATE, episode))
    } else {
        path
    }
}

/// Creates the parent directories of an output file
pub fn prepare_output(path: &Path) -> Result<(), OutputError> {
    if path.is_dir() {
        return Err(OutputError::IsDirectory(path.to_path_buf()));
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| OutputError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}
