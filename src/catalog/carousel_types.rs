/// Carousel feed response types for deserialization.
///
/// These structures mirror the JSON served by the providers' season carousels.
/// Every field is optional because the providers omit fields freely.
use serde::Deserialize;

/// The top-level response of a season carousel feed.
#[derive(Debug, Deserialize)]
pub(super) struct CarouselSeason {
    /// Episodes of the requested season, newest air date first
    #[serde(default)]
    pub results: Vec<CarouselEpisode>,
}

/// A single episode of a carousel feed.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CarouselEpisode {
    /// Provider internal identifier
    pub item_id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub short_description: Option<String>,
    /// Thumbnail URL
    pub images: Option<String>,
    /// Unix timestamp as a string
    pub original_air_date: Option<String>,
    /// Global episode number like "1908" (season 19, episode 08)
    pub episode_number: Option<String>,
}
