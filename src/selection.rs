//! Episode selection expressions
//!
//! Parses expressions like `S01,S02-S04,S05E01-S05E04` into a normalized
//! [`Selection`]. Season sizes are unknown at parse time, so open ranges are
//! kept symbolic and answered with [`Selection::covers`] once the catalog has
//! listed the affected seasons.

use regex::Regex;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

static TOKEN_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?i)S(\d+)(?:E(\d+))?$").expect("selector pattern is valid")
});

/// Errors that can occur while parsing a selection expression
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    /// A token of the expression is not a valid selector
    #[error("Invalid season/episode selector: \"{token}\". Valid examples: 'S01', 'S01E03' or 'S01-S03'")]
    InvalidSelector { token: String },
}

/// One season (`episode == None`) or one episode of a season
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EpisodeRef {
    pub season: u32,
    pub episode: Option<u32>,
}

impl EpisodeRef {
    pub fn season(season: u32) -> Self {
        Self {
            season,
            episode: None,
        }
    }

    pub fn episode(season: u32, episode: u32) -> Self {
        Self {
            season,
            episode: Some(episode),
        }
    }

    fn parse(token: &str) -> Result<Self, SelectionError> {
        let invalid = || SelectionError::InvalidSelector {
            token: token.to_string(),
        };

        let captures = TOKEN_PATTERN.captures(token).ok_or_else(invalid)?;
        let season = captures[1].parse::<u32>().map_err(|_| invalid())?;
        let episode = match captures.get(2) {
            Some(m) => Some(m.as_str().parse::<u32>().map_err(|_| invalid())?),
            None => None,
        };

        Ok(Self { season, episode })
    }
}

impl fmt::Display for EpisodeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.episode {
            Some(episode) => write!(f, "S{:02}E{:02}", self.season, episode),
            None => write!(f, "S{:02}", self.season),
        }
    }
}

/// A single element of a normalized selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Selector {
    /// A whole season or one episode
    Single(EpisodeRef),
    /// Everything from `start` to `end`, both endpoints inclusive
    Range { start: EpisodeRef, end: EpisodeRef },
}

impl Selector {
    fn bounds(&self) -> (EpisodeRef, EpisodeRef) {
        match *self {
            Selector::Single(r) => (r, r),
            Selector::Range { start, end } => (start, end),
        }
    }

    fn covers(&self, season: u32, episode: u32) -> bool {
        match *self {
            Selector::Single(r) => {
                r.season == season && r.episode.is_none_or(|e| e == episode)
            }
            Selector::Range { start, end } => {
                if season < start.season || season > end.season {
                    return false;
                }
                if season == start.season && start.episode.is_some_and(|b| episode < b) {
                    return false;
                }
                if season == end.season && end.episode.is_some_and(|d| episode > d) {
                    return false;
                }
                true
            }
        }
    }
}

impl PartialOrd for Selector {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Selector {
    fn cmp(&self, other: &Self) -> Ordering {
        let is_range = |s: &Selector| matches!(s, Selector::Range { .. });
        self.bounds()
            .cmp(&other.bounds())
            .then_with(|| is_range(self).cmp(&is_range(other)))
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Single(r) => write!(f, "{}", r),
            Selector::Range { start, end } => write!(f, "{}-{}", start, end),
        }
    }
}

/// A normalized, deduplicated and ordered selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    selectors: Vec<Selector>,
}

impl Selection {
    /// Parses a comma separated selection expression
    ///
    /// Ranges stay symbolic: `S01E05-S01E08` covers whatever episodes 5 to 8 of
    /// season 1 exist once the season is listed. `S02-S02` collapses to `S02`.
    ///
    /// # Examples
    ///
    /// ```
    /// use parkdl::Selection;
    ///
    /// let selection = Selection::parse("S2-S3, s01e05").unwrap();
    /// assert_eq!(selection.to_string(), "S01E05,S02-S03");
    /// ```
    pub fn parse(expression: &str) -> Result<Self, SelectionError> {
        let mut selectors = BTreeSet::new();

        for token in expression.split(',').map(str::trim) {
            let parts: Vec<&str> = token.split('-').map(str::trim).collect();
            match parts.as_slice() {
                [single] => {
                    selectors.insert(Selector::Single(EpisodeRef::parse(single)?));
                }
                [start, end] => {
                    let start = EpisodeRef::parse(start)?;
                    let end = EpisodeRef::parse(end)?;
                    expand_range(token, start, end, &mut selectors)?;
                }
                _ => {
                    return Err(SelectionError::InvalidSelector {
                        token: token.to_string(),
                    });
                }
            }
        }

        Ok(Self {
            selectors: selectors.into_iter().collect(),
        })
    }

    /// The normalized selectors in canonical order
    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    /// Seasons whose episode listing is needed to resolve this selection
    pub fn seasons(&self) -> BTreeSet<u32> {
        self.selectors
            .iter()
            .flat_map(|s| {
                let (start, end) = s.bounds();
                start.season..=end.season
            })
            .collect()
    }

    /// Single episodes named explicitly, which must exist in the catalog
    pub fn explicit_refs(&self) -> Vec<EpisodeRef> {
        self.selectors
            .iter()
            .filter_map(|s| match s {
                Selector::Single(r) if r.episode.is_some() => Some(*r),
                _ => None,
            })
            .collect()
    }

    /// Whether episode `episode` of season `season` is selected
    pub fn covers(&self, season: u32, episode: u32) -> bool {
        self.selectors.iter().any(|s| s.covers(season, episode))
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self.selectors.iter().map(|s| s.to_string()).collect();
        f.write_str(&rendered.join(","))
    }
}

fn expand_range(
    token: &str,
    start: EpisodeRef,
    end: EpisodeRef,
    selectors: &mut BTreeSet<Selector>,
) -> Result<(), SelectionError> {
    let invalid = || SelectionError::InvalidSelector {
        token: token.to_string(),
    };

    if start.season > end.season {
        return Err(invalid());
    }

    if start.season == end.season {
        match (start.episode, end.episode) {
            (Some(first), Some(last)) if first > last => return Err(invalid()),
            (None, None) => {
                selectors.insert(Selector::Single(start));
                return Ok(());
            }
            _ => {}
        }
    }

    selectors.insert(Selector::Range { start, end });
    Ok(())
}
