//! Feed resolution
//!
//! Turns an [`Episode`] into the ordered list of [`MediaDescriptor`]s making up
//! its broadcast segments. The feed document shape depends on the locale (see
//! [`FeedFormat`]); both shapes yield descriptors in document order, which is
//! the playback order.

use crate::catalog::Episode;
use crate::http::HttpFetcher;
use crate::locale::{DomainTable, FeedFormat, Locale};
use quick_xml::events::Event;
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use serde::Deserialize;
use std::fmt;
use thiserror::Error;
use tracing::{debug, info};

const MRSS_NAMESPACE: &[u8] = b"http://search.yahoo.com/mrss/";

/// Path marker of the Spanish dubbed segments
pub(crate) const SPANISH_ACTS: &str = "acts/es";

/// Errors that can occur while resolving an episode feed
#[derive(Debug, Error)]
pub enum FeedError {
    /// The feed could not be retrieved (after all retries) or was empty
    #[error("Feed {url} unavailable: {reason}")]
    Unavailable { url: String, reason: String },

    /// The feed was retrieved but does not have the shape expected for the locale
    #[error("Failed to parse {format:?} feed {url}: {reason}")]
    Parse {
        url: String,
        format: FeedFormat,
        reason: String,
    },

    /// The domain table has no entry for the locale
    #[error("No provider domain configured for locale {0}")]
    NoDomain(Locale),
}

/// URL of one part's manifest-generator endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor(String);

impl MediaDescriptor {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn url(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MediaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Deserialize)]
struct EdgeDocument {
    feed: EdgeFeed,
}

#[derive(Debug, Deserialize)]
struct EdgeFeed {
    items: Vec<EdgeItem>,
}

#[derive(Debug, Deserialize)]
struct EdgeItem {
    group: EdgeGroup,
}

#[derive(Debug, Deserialize)]
struct EdgeGroup {
    content: String,
}

/// Resolves episodes to their media descriptors
pub struct FeedResolver<'a, F: HttpFetcher> {
    fetcher: &'a F,
    domains: DomainTable,
}

impl<'a, F: HttpFetcher> FeedResolver<'a, F> {
    pub fn new(fetcher: &'a F, domains: DomainTable) -> Self {
        Self { fetcher, domains }
    }

    /// Builds the feed URL for an episode
    pub fn feed_url(&self, episode: &Episode) -> Result<String, FeedError> {
        let domains = self
            .domains
            .get(episode.locale)
            .ok_or(FeedError::NoDomain(episode.locale))?;

        Ok(match episode.locale.feed_format() {
            FeedFormat::EdgeJson => format!(
                "https://media.mtvnservices.com/pmt/e1/access/index.html?uri=mgid:arc:episode:{}:{}&configtype=edge",
                domains.uri_domain, episode.id
            ),
            FeedFormat::Mrss => format!(
                "https://{}/feeds/video-player/mrss/mgid:arc:episode:{}:{}?lang={}",
                domains.feed_host,
                domains.uri_domain,
                episode.id,
                episode.locale.code().to_uppercase()
            ),
        })
    }

    /// Retrieves and parses the episode feed
    ///
    /// The returned descriptors are in document order and must not be re-sorted.
    ///
    /// # Errors
    ///
    /// `Unavailable` when the transport fails or returns nothing, `Parse` when the
    /// document does not match the locale's format or lists no parts.
    pub fn resolve_media(&self, episode: &Episode) -> Result<Vec<MediaDescriptor>, FeedError> {
        let url = self.feed_url(episode)?;
        debug!(%url, episode = %episode.id, "fetching feed");

        let body = self.fetcher.get(&url).map_err(|e| FeedError::Unavailable {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        if body.is_empty() {
            return Err(FeedError::Unavailable {
                url,
                reason: "empty response".to_string(),
            });
        }

        let format = episode.locale.feed_format();
        let parse_error = |reason: String| FeedError::Parse {
            url: url.clone(),
            format,
            reason,
        };

        let descriptors = match format {
            FeedFormat::EdgeJson => parse_edge_feed(&body),
            FeedFormat::Mrss => parse_mrss_feed(&body),
        }
        .map_err(parse_error)?;

        let keep_spanish = episode.locale.keeps_spanish_acts();
        let descriptors: Vec<MediaDescriptor> = descriptors
            .into_iter()
            .filter(|d| keep_spanish || !d.url().contains(SPANISH_ACTS))
            .collect();

        if descriptors.is_empty() {
            return Err(parse_error("feed lists no media parts".to_string()));
        }

        info!(episode = %episode.id, parts = descriptors.len(), "feed resolved");
        Ok(descriptors)
    }
}

fn percent_decode(raw: &str) -> Result<String, String> {
    urlencoding::decode(raw)
        .map(|s| s.into_owned())
        .map_err(|e| format!("invalid percent-encoding in {raw}: {e}"))
}

fn parse_edge_feed(body: &[u8]) -> Result<Vec<MediaDescriptor>, String> {
    let document: EdgeDocument = serde_json::from_slice(body).map_err(|e| e.to_string())?;

    document
        .feed
        .items
        .into_iter()
        .map(|item| percent_decode(&item.group.content).map(MediaDescriptor))
        .collect()
}

fn parse_mrss_feed(body: &[u8]) -> Result<Vec<MediaDescriptor>, String> {
    let xml = std::str::from_utf8(body).map_err(|e| e.to_string())?;
    let mut reader = NsReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut descriptors = Vec::new();

    loop {
        match reader.read_resolved_event() {
            Ok((ResolveResult::Bound(Namespace(ns)), Event::Start(e) | Event::Empty(e)))
                if ns == MRSS_NAMESPACE && e.local_name().as_ref() == b"content" =>
            {
                let attribute = e.try_get_attribute("url").map_err(|e| e.to_string())?;
                if let Some(attribute) = attribute {
                    let value = attribute.unescape_value().map_err(|e| e.to_string())?;
                    descriptors.push(MediaDescriptor(percent_decode(&value)?));
                }
            }
            Ok((_, Event::Eof)) => break,
            Err(e) => return Err(format!("XML error: {e}")),
            _ => {}
        }
    }

    Ok(descriptors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testing::episode;
    use crate::http::testing::StaticFetcher;

    const MRSS_FEED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<rss xmlns:media="http://search.yahoo.com/mrss/" version="2.0">
  <channel>
    <item>
      <media:group>
        <media:content url="https://media.example.com/gen?uri=mgid%3Aarc%3Avideo%3Aact1&amp;device={device}"/>
      </media:group>
    </item>
    <item>
      <media:group>
        <media:content url="https://media.example.com/gen?uri=mgid%3Aarc%3Avideo%3Aact2&amp;device={device}"></media:content>
      </media:group>
    </item>
    <item>
      <content url="https://not-mrss.example.com/ignored"/>
      <media:content url="https://media.example.com/acts/es/act3"/>
    </item>
  </channel>
</rss>"#;

    const EDGE_FEED: &str = r#"{
        "feed": {
            "items": [
                { "group": { "content": "https://media.example.com/gen?uri=mgid%3Aarc%3Avideo%3Ap1" } },
                { "group": { "content": "https://media.example.com/gen?uri=mgid%3Aarc%3Avideo%3Ap2" } }
            ]
        }
    }"#;

    fn mrss_url(locale: Locale) -> String {
        let mut e = episode(19, 2);
        e.locale = locale;
        let fetcher = StaticFetcher::default();
        FeedResolver::new(&fetcher, DomainTable::default())
            .feed_url(&e)
            .unwrap()
    }

    #[test]
    fn test_feed_urls_per_locale() {
        assert_eq!(
            mrss_url(Locale::En),
            "https://southpark.cc.com/feeds/video-player/mrss/mgid:arc:episode:southparkstudios.com:id-19-2?lang=EN"
        );
        assert_eq!(
            mrss_url(Locale::De),
            "https://www.southpark.de/feeds/video-player/mrss/mgid:arc:episode:southpark.de:id-19-2?lang=DE"
        );
        assert_eq!(
            mrss_url(Locale::Se),
            "https://media.mtvnservices.com/pmt/e1/access/index.html?uri=mgid:arc:episode:southparkstudios.nu:id-19-2&configtype=edge"
        );
    }

    #[test]
    fn test_mrss_feed_keeps_document_order_and_filters_spanish() {
        let e = episode(19, 2);
        let fetcher = StaticFetcher::default().with(&mrss_url(Locale::En), MRSS_FEED);
        let resolver = FeedResolver::new(&fetcher, DomainTable::default());

        let descriptors = resolver.resolve_media(&e).unwrap();
        assert_eq!(
            descriptors,
            vec![
                MediaDescriptor::new(
                    "https://media.example.com/gen?uri=mgid:arc:video:act1&device={device}"
                ),
                MediaDescriptor::new(
                    "https://media.example.com/gen?uri=mgid:arc:video:act2&device={device}"
                ),
            ]
        );
    }

    #[test]
    fn test_spanish_locale_keeps_spanish_acts() {
        let mut e = episode(19, 2);
        e.locale = Locale::Es;
        let fetcher = StaticFetcher::default().with(&mrss_url(Locale::Es), MRSS_FEED);
        let resolver = FeedResolver::new(&fetcher, DomainTable::default());

        let descriptors = resolver.resolve_media(&e).unwrap();
        assert_eq!(descriptors.len(), 3);
        assert_eq!(descriptors[2].url(), "https://media.example.com/acts/es/act3");
    }

    #[test]
    fn test_edge_feed_is_percent_decoded() {
        let mut e = episode(19, 2);
        e.locale = Locale::Se;
        let fetcher = StaticFetcher::default().with(&mrss_url(Locale::Se), EDGE_FEED);
        let resolver = FeedResolver::new(&fetcher, DomainTable::default());

        let descriptors = resolver.resolve_media(&e).unwrap();
        assert_eq!(
            descriptors
                .iter()
                .map(MediaDescriptor::url)
                .collect::<Vec<_>>(),
            vec![
                "https://media.example.com/gen?uri=mgid:arc:video:p1",
                "https://media.example.com/gen?uri=mgid:arc:video:p2",
            ]
        );
    }

    #[test]
    fn test_unreachable_and_empty_feeds_are_unavailable() {
        let e = episode(19, 2);
        let fetcher = StaticFetcher::default();
        let resolver = FeedResolver::new(&fetcher, DomainTable::default());
        assert!(matches!(
            resolver.resolve_media(&e),
            Err(FeedError::Unavailable { .. })
        ));

        let fetcher = StaticFetcher::default().with(&mrss_url(Locale::En), "");
        let resolver = FeedResolver::new(&fetcher, DomainTable::default());
        assert!(matches!(
            resolver.resolve_media(&e),
            Err(FeedError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_wrong_shape_is_a_parse_error() {
        let mut e = episode(19, 2);
        e.locale = Locale::Se;
        let fetcher = StaticFetcher::default().with(&mrss_url(Locale::Se), MRSS_FEED);
        let resolver = FeedResolver::new(&fetcher, DomainTable::default());
        assert!(matches!(
            resolver.resolve_media(&e),
            Err(FeedError::Parse {
                format: FeedFormat::EdgeJson,
                ..
            })
        ));

        let e = episode(19, 2);
        let fetcher = StaticFetcher::default().with(&mrss_url(Locale::En), EDGE_FEED);
        let resolver = FeedResolver::new(&fetcher, DomainTable::default());
        assert!(matches!(
            resolver.resolve_media(&e),
            Err(FeedError::Parse {
                format: FeedFormat::Mrss,
                ..
            })
        ));
    }

    #[test]
    fn test_missing_domain() {
        let e = episode(19, 2);
        let fetcher = StaticFetcher::default();
        let resolver = FeedResolver::new(&fetcher, DomainTable::new());
        assert!(matches!(
            resolver.resolve_media(&e),
            Err(FeedError::NoDomain(Locale::En))
        ));
    }
}
