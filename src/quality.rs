//! Quality selection
//!
//! Picks exactly one [`Stream`] out of the variants offered for a media part.

use crate::manifest::Stream;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during quality selection
#[derive(Debug, Error, PartialEq, Eq)]
pub enum QualityError {
    /// The quality string is neither a keyword nor a `WxH` resolution
    #[error("Invalid quality string: \"{value}\". Use one of 'max', 'median', 'min' or a resolution like '1920x1080'")]
    InvalidQuality { value: String },

    /// There was nothing to choose from
    #[error("No streams to select from")]
    NoStreams,
}

/// Video resolution in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    fn area(&self) -> u64 {
        u64::from(self.width) * u64::from(self.height)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Resolution {
    type Err = QualityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || QualityError::InvalidQuality {
            value: s.to_string(),
        };

        let (width, height) = s.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
        let parse = |part: &str| {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(invalid());
            }
            part.parse::<u32>().map_err(|_| invalid())
        };

        Ok(Self::new(parse(width)?, parse(height)?))
    }
}

/// Rule used to pick one stream out of a media part's variants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QualityPolicy {
    /// Widest stream
    #[default]
    Max,
    /// Narrowest stream
    Min,
    /// Element `len / 2` of the streams ranked by descending width
    Median,
    /// Stream whose pixel count is closest to the target's
    Nearest(Resolution),
}

impl fmt::Display for QualityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityPolicy::Max => f.write_str("max"),
            QualityPolicy::Min => f.write_str("min"),
            QualityPolicy::Median => f.write_str("median"),
            QualityPolicy::Nearest(resolution) => write!(f, "{}", resolution),
        }
    }
}

impl FromStr for QualityPolicy {
    type Err = QualityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "max" => Ok(QualityPolicy::Max),
            "min" => Ok(QualityPolicy::Min),
            "median" | "medium" => Ok(QualityPolicy::Median),
            _ => s.parse::<Resolution>().map(QualityPolicy::Nearest),
        }
    }
}

impl QualityPolicy {
    /// Selects one stream according to this policy
    ///
    /// Ties are broken by input order: the first qualifying stream wins.
    pub fn select<'s>(&self, streams: &'s [Stream]) -> Result<&'s Stream, QualityError> {
        let first = streams.first().ok_or(QualityError::NoStreams)?;

        let selected = match self {
            QualityPolicy::Max => streams.iter().fold(first, |best, s| {
                if s.resolution.width > best.resolution.width {
                    s
                } else {
                    best
                }
            }),
            QualityPolicy::Min => streams.iter().fold(first, |best, s| {
                if s.resolution.width < best.resolution.width {
                    s
                } else {
                    best
                }
            }),
            QualityPolicy::Median => {
                let mut ranked: Vec<&Stream> = streams.iter().collect();
                ranked.sort_by(|a, b| b.resolution.width.cmp(&a.resolution.width));
                ranked[ranked.len() / 2]
            }
            QualityPolicy::Nearest(target) => streams
                .iter()
                .min_by_key(|s| s.resolution.area().abs_diff(target.area()))
                .unwrap_or(first),
        };

        Ok(selected)
    }
}
