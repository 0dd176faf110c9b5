/// Episode catalog lookup.
///
/// This module provides the [`Episode`] structure carrying the descriptive
/// metadata of one episode, the [`SeasonCatalog`] trait for listing seasons and
/// their episodes, and the resolution of a [`Selection`] into concrete episodes.
mod carousel;
mod carousel_types;

pub use carousel::CarouselCatalog;

use crate::locale::Locale;
use crate::selection::Selection;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use thiserror::Error;
use tracing::debug;

/// Errors that can occur during catalog lookups.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Request to the catalog failed
    #[error("Catalog request failed: {0}")]
    RequestError(String),

    /// Failed to parse the catalog's JSON response
    #[error("Failed to parse catalog response for season {season}: {message}")]
    ParseError { season: u32, message: String },

    /// An explicitly requested episode does not exist
    #[error("Season {season} Episode {episode} does not exist")]
    EpisodeNotFound { season: u32, episode: u32 },
}

/// One episode together with the metadata used for file names and tags.
#[derive(Debug, Clone, PartialEq)]
pub struct Episode {
    /// Provider internal identifier
    pub id: String,
    /// The episode title
    pub title: String,
    /// Long description
    pub description: String,
    /// Short description
    pub short_description: String,
    /// URL of the thumbnail image
    pub thumbnail_url: String,
    /// Original air date
    pub air_date: DateTime<Utc>,
    /// Global episode number, e.g. "1908"
    pub episode_number: String,
    /// Season number as served, e.g. "19"
    pub season: String,
    /// Episode number relative to its season, e.g. "08"
    pub episode_in_season: String,
    /// Locale the episode was listed for
    pub locale: Locale,
}

impl Episode {
    /// Numeric season, 0 when the provider sent garbage
    pub fn season_index(&self) -> u32 {
        self.season.parse().unwrap_or(0)
    }

    /// Numeric episode within the season, 0 when the provider sent garbage
    pub fn episode_index(&self) -> u32 {
        self.episode_in_season.parse().unwrap_or(0)
    }
}

/// Trait for catalogs that can list seasons and their episodes.
pub trait SeasonCatalog {
    /// Lists all season numbers available for the catalog's locale.
    fn season_numbers(&self) -> Result<Vec<u32>, CatalogError>;

    /// Lists the episodes of one season.
    fn season(&self, season: u32) -> Result<Vec<Episode>, CatalogError>;
}

/// Resolves a selection into the concrete episodes it covers
///
/// Every needed season is listed exactly once. Episodes are deduplicated by id
/// and returned ordered by `(season, episode_in_season)`.
///
/// # Errors
///
/// Fails when a season cannot be listed or when an explicitly named episode
/// (`SxxEyy`) does not exist.
pub fn resolve_selection<C: SeasonCatalog + ?Sized>(
    catalog: &C,
    selection: &Selection,
) -> Result<Vec<Episode>, CatalogError> {
    let mut episodes = Vec::new();
    let mut seen = HashSet::new();

    for season in selection.seasons() {
        let listed = catalog.season(season)?;
        debug!(season, count = listed.len(), "season listed");

        for explicit in selection.explicit_refs() {
            if explicit.season != season {
                continue;
            }
            let episode = explicit.episode.unwrap_or_default();
            if !listed.iter().any(|e| e.episode_index() == episode) {
                return Err(CatalogError::EpisodeNotFound { season, episode });
            }
        }

        for episode in listed {
            if selection.covers(season, episode.episode_index()) && seen.insert(episode.id.clone())
            {
                episodes.push(episode);
            }
        }
    }

    sort_episodes(&mut episodes);
    Ok(episodes)
}

/// Lists every episode of every season of the catalog
pub fn resolve_all<C: SeasonCatalog + ?Sized>(catalog: &C) -> Result<Vec<Episode>, CatalogError> {
    let mut episodes = Vec::new();
    let mut seen = HashSet::new();

    for season in catalog.season_numbers()? {
        for episode in catalog.season(season)? {
            if seen.insert(episode.id.clone()) {
                episodes.push(episode);
            }
        }
    }

    sort_episodes(&mut episodes);
    Ok(episodes)
}

fn sort_episodes(episodes: &mut [Episode]) {
    episodes.sort_by_key(|e| (e.season_index(), e.episode_index()));
}
