//! Stream extraction
//!
//! A [`MediaDescriptor`] points at a manifest generator. Its XML answer names the
//! HLS source of the part (plus durations and captions); the HLS master playlist
//! behind that source lists one variant per resolution, each becoming a
//! [`Stream`].

use crate::feed::{MediaDescriptor, SPANISH_ACTS};
use crate::http::HttpFetcher;
use crate::locale::Locale;
use crate::quality::Resolution;
use m3u8_rs::Playlist;
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

const DEVICE_PLACEHOLDER: &str = "device={device}";

/// Errors that can occur during stream extraction
#[derive(Debug, Error)]
pub enum ManifestError {
    /// A manifest could not be retrieved (after all retries) or was empty
    #[error("Manifest {url} unavailable: {reason}")]
    Unavailable { url: String, reason: String },

    /// A manifest was retrieved but could not be parsed
    #[error("Failed to parse manifest {url}: {reason}")]
    Parse { url: String, reason: String },

    /// The manifest offers no playable stream
    #[error("No streams available in manifest {url}")]
    NoStreamsAvailable { url: String },
}

/// One resolution variant of a media part
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stream {
    pub resolution: Resolution,
    pub url: String,
}

/// What the manifest generator tells about one media part
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PartManifest {
    /// Stream sources in document order
    pub sources: Vec<String>,
    /// Durations of the listed renditions
    pub durations: Vec<Duration>,
    /// WebVTT captions, if offered
    pub captions: Option<String>,
}

impl PartManifest {
    /// The source the variant playlist is read from
    ///
    /// Renditions are listed from lowest to highest quality, so the last one
    /// carries the full variant ladder.
    pub fn playlist_source(&self) -> Option<&str> {
        self.sources.last().map(String::as_str)
    }

    /// Longest listed rendition duration
    pub fn duration(&self) -> Option<Duration> {
        self.durations.iter().max().copied()
    }
}

/// Manifest-generator URL asking for the HLS manifest form
pub fn manifest_url(descriptor: &MediaDescriptor, locale: Locale) -> String {
    descriptor
        .url()
        .replace(DEVICE_PLACEHOLDER, locale.device_query())
}

/// Extracts the ranked streams of media parts
pub struct StreamExtractor<'a, F: HttpFetcher> {
    fetcher: &'a F,
}

impl<'a, F: HttpFetcher> StreamExtractor<'a, F> {
    pub fn new(fetcher: &'a F) -> Self {
        Self { fetcher }
    }

    /// Retrieves the streams of a media part, ranked by descending width
    ///
    /// # Errors
    ///
    /// Never returns an empty list: a part without any usable variant fails
    /// with [`ManifestError::NoStreamsAvailable`].
    pub fn extract_streams(
        &self,
        descriptor: &MediaDescriptor,
        locale: Locale,
    ) -> Result<Vec<Stream>, ManifestError> {
        let manifest = self.part_manifest(descriptor, locale)?;
        self.streams(&manifest, &manifest_url(descriptor, locale))
    }

    /// Retrieves and parses the manifest-generator document of a media part
    pub fn part_manifest(
        &self,
        descriptor: &MediaDescriptor,
        locale: Locale,
    ) -> Result<PartManifest, ManifestError> {
        let url = manifest_url(descriptor, locale);
        let body = self.fetch(&url)?;

        parse_part_manifest(&body, locale).map_err(|reason| ManifestError::Parse { url, reason })
    }

    /// Reads the variant playlist named by a part manifest
    ///
    /// `manifest_url` is only used for error reporting.
    pub fn streams(
        &self,
        manifest: &PartManifest,
        manifest_url: &str,
    ) -> Result<Vec<Stream>, ManifestError> {
        let source = manifest
            .playlist_source()
            .ok_or_else(|| ManifestError::NoStreamsAvailable {
                url: manifest_url.to_string(),
            })?;

        let body = self.fetch(source)?;
        let streams = parse_variant_playlist(&body, source).map_err(|reason| {
            ManifestError::Parse {
                url: source.to_string(),
                reason,
            }
        })?;

        if streams.is_empty() {
            return Err(ManifestError::NoStreamsAvailable {
                url: source.to_string(),
            });
        }

        debug!(source, variants = streams.len(), "variant playlist parsed");
        Ok(streams)
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, ManifestError> {
        let body = self
            .fetcher
            .get(url)
            .map_err(|e| ManifestError::Unavailable {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

        if body.is_empty() {
            return Err(ManifestError::Unavailable {
                url: url.to_string(),
                reason: "empty response".to_string(),
            });
        }
        Ok(body)
    }
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Result<Option<String>, String> {
    match element.try_get_attribute(name).map_err(|e| e.to_string())? {
        Some(attr) => Ok(Some(
            attr.unescape_value()
                .map_err(|e| e.to_string())?
                .into_owned(),
        )),
        None => Ok(None),
    }
}

fn parse_part_manifest(body: &[u8], locale: Locale) -> Result<PartManifest, String> {
    let xml = std::str::from_utf8(body).map_err(|e| e.to_string())?;
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut manifest = PartManifest::default();
    let mut saw_element = false;
    let mut current_src: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                saw_element = true;
                match e.name().as_ref() {
                    b"src" => current_src = Some(String::new()),
                    b"rendition" => push_duration(&mut manifest, &e)?,
                    b"typographic" => read_captions(&mut manifest, &e)?,
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                saw_element = true;
                match e.name().as_ref() {
                    b"rendition" => push_duration(&mut manifest, &e)?,
                    b"typographic" => read_captions(&mut manifest, &e)?,
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if let Some(src) = current_src.as_mut() {
                    src.push_str(&e.unescape().map_err(|e| e.to_string())?);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(src) = current_src.as_mut() {
                    src.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"src" {
                    if let Some(src) = current_src.take() {
                        push_source(&mut manifest, src.trim(), locale);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(format!("XML error: {e}")),
            _ => {}
        }
    }

    if !saw_element {
        return Err("not an XML document".to_string());
    }
    Ok(manifest)
}

fn push_source(manifest: &mut PartManifest, src: &str, locale: Locale) {
    if src.is_empty() || src.contains("intros") {
        return;
    }
    if !locale.keeps_spanish_acts() && src.contains(SPANISH_ACTS) {
        return;
    }
    manifest.sources.push(src.to_string());
}

fn push_duration(manifest: &mut PartManifest, element: &BytesStart<'_>) -> Result<(), String> {
    if let Some(value) = attribute(element, "duration")? {
        match value.trim().parse::<u64>() {
            Ok(secs) => manifest.durations.push(Duration::from_secs(secs)),
            Err(_) => warn!(value, "ignoring rendition with invalid duration"),
        }
    }
    Ok(())
}

fn read_captions(manifest: &mut PartManifest, element: &BytesStart<'_>) -> Result<(), String> {
    let format = attribute(element, "format")?;
    let src = attribute(element, "src")?;
    if let (Some("vtt"), Some(src)) = (format.as_deref(), src) {
        manifest.captions = Some(src);
    }
    Ok(())
}

fn parse_variant_playlist(body: &[u8], playlist_url: &str) -> Result<Vec<Stream>, String> {
    let playlist = m3u8_rs::parse_playlist_res(body).map_err(|e| format!("{e:?}"))?;

    let variants = match playlist {
        Playlist::MasterPlaylist(master) => master.variants,
        Playlist::MediaPlaylist(_) => return Ok(Vec::new()),
    };

    let base = Url::parse(playlist_url).ok();
    let mut streams: Vec<Stream> = variants
        .into_iter()
        .filter(|v| !v.is_i_frame)
        .filter_map(|v| {
            let Some(resolution) = v.resolution else {
                debug!(uri = %v.uri, "skipping variant without resolution");
                return None;
            };
            let width = u32::try_from(resolution.width).ok()?;
            let height = u32::try_from(resolution.height).ok()?;

            let url = base
                .as_ref()
                .and_then(|b| b.join(&v.uri).ok())
                .map(|u| u.to_string())
                .unwrap_or(v.uri);

            Some(Stream {
                resolution: Resolution::new(width, height),
                url,
            })
        })
        .collect();

    streams.sort_by(|a, b| b.resolution.width.cmp(&a.resolution.width));
    Ok(streams)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::testing::StaticFetcher;

    const DESCRIPTOR: &str = "https://media.example.com/gen?uri=mgid:arc:video:act1&device={device}";
    const MANIFEST_EN: &str = "https://media.example.com/gen?uri=mgid:arc:video:act1&device=Android&deviceOsVersion=4.4.4&acceptMethods=hls";

    const PART_MANIFEST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<package version="1.0">
  <video>
    <item>
      <rendition cdn="level3" duration="422" width="640" height="360" type="video/mp4">
        <src>https://cdn.example.com/intros/intro.m3u8</src>
      </rendition>
      <rendition cdn="level3" duration="4x">
        <src><![CDATA[https://cdn.example.com/acts/es/act1/master.m3u8]]></src>
      </rendition>
      <rendition cdn="level3" duration="431" width="1920" height="1080" type="video/mp4">
        <src><![CDATA[https://cdn.example.com/acts/en/act1/master.m3u8]]></src>
      </rendition>
      <transcript>
        <typographic format="ttml" src="https://cdn.example.com/act1.ttml"/>
        <typographic format="vtt" src="https://cdn.example.com/act1.vtt"/>
      </transcript>
    </item>
  </video>
</package>"#;

    const MASTER_PLAYLIST: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=1200000,RESOLUTION=960x540
540/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=5000000,RESOLUTION=1920x1080
https://cdn.example.com/acts/en/act1/1080/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=64000,CODECS=\"mp4a.40.2\"
audio/index.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=2500000,RESOLUTION=1280x720
720/index.m3u8
";

    const MEDIA_PLAYLIST: &str = "#EXTM3U
#EXT-X-VERSION:3
#EXT-X-TARGETDURATION:10
#EXTINF:10.0,
segment0.ts
#EXT-X-ENDLIST
";

    #[test]
    fn test_device_placeholder_per_locale() {
        let descriptor = MediaDescriptor::new(DESCRIPTOR);
        assert_eq!(
            manifest_url(&descriptor, Locale::En),
            MANIFEST_EN
        );
        assert_eq!(
            manifest_url(&descriptor, Locale::De),
            "https://media.example.com/gen?uri=mgid:arc:video:act1&acceptMethods=hls"
        );
    }

    #[test]
    fn test_part_manifest_filters_intros_and_spanish_acts() {
        let manifest = parse_part_manifest(PART_MANIFEST.as_bytes(), Locale::En).unwrap();
        assert_eq!(
            manifest.sources,
            vec!["https://cdn.example.com/acts/en/act1/master.m3u8"]
        );
        assert_eq!(
            manifest.durations,
            vec![Duration::from_secs(422), Duration::from_secs(431)]
        );
        assert_eq!(manifest.duration(), Some(Duration::from_secs(431)));
        assert_eq!(
            manifest.captions.as_deref(),
            Some("https://cdn.example.com/act1.vtt")
        );

        let spanish = parse_part_manifest(PART_MANIFEST.as_bytes(), Locale::Es).unwrap();
        assert_eq!(spanish.sources.len(), 2);
    }

    #[test]
    fn test_extract_streams_ranks_variants() {
        let fetcher = StaticFetcher::default()
            .with(MANIFEST_EN, PART_MANIFEST)
            .with(
                "https://cdn.example.com/acts/en/act1/master.m3u8",
                MASTER_PLAYLIST,
            );
        let extractor = StreamExtractor::new(&fetcher);

        let streams = extractor
            .extract_streams(&MediaDescriptor::new(DESCRIPTOR), Locale::En)
            .unwrap();

        assert_eq!(
            streams,
            vec![
                Stream {
                    resolution: Resolution::new(1920, 1080),
                    url: "https://cdn.example.com/acts/en/act1/1080/index.m3u8".to_string(),
                },
                Stream {
                    resolution: Resolution::new(1280, 720),
                    url: "https://cdn.example.com/acts/en/act1/720/index.m3u8".to_string(),
                },
                Stream {
                    resolution: Resolution::new(960, 540),
                    url: "https://cdn.example.com/acts/en/act1/540/index.m3u8".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_playlist_without_variants_has_no_streams() {
        let fetcher = StaticFetcher::default()
            .with(MANIFEST_EN, PART_MANIFEST)
            .with(
                "https://cdn.example.com/acts/en/act1/master.m3u8",
                MEDIA_PLAYLIST,
            );
        let extractor = StreamExtractor::new(&fetcher);

        assert!(matches!(
            extractor.extract_streams(&MediaDescriptor::new(DESCRIPTOR), Locale::En),
            Err(ManifestError::NoStreamsAvailable { .. })
        ));
    }

    #[test]
    fn test_manifest_without_sources_has_no_streams() {
        let fetcher = StaticFetcher::default().with(
            MANIFEST_EN,
            r#"<package><video><item><rendition duration="1"><src>https://cdn.example.com/intros/a.m3u8</src></rendition></item></video></package>"#,
        );
        let extractor = StreamExtractor::new(&fetcher);

        assert!(matches!(
            extractor.extract_streams(&MediaDescriptor::new(DESCRIPTOR), Locale::En),
            Err(ManifestError::NoStreamsAvailable { .. })
        ));
    }

    #[test]
    fn test_unavailable_and_unparseable_manifests() {
        let fetcher = StaticFetcher::default();
        let extractor = StreamExtractor::new(&fetcher);
        assert!(matches!(
            extractor.extract_streams(&MediaDescriptor::new(DESCRIPTOR), Locale::En),
            Err(ManifestError::Unavailable { .. })
        ));

        let fetcher = StaticFetcher::default().with(MANIFEST_EN, "<package><video></item></package>");
        let extractor = StreamExtractor::new(&fetcher);
        assert!(matches!(
            extractor.extract_streams(&MediaDescriptor::new(DESCRIPTOR), Locale::En),
            Err(ManifestError::Parse { .. })
        ));

        let fetcher = StaticFetcher::default().with(MANIFEST_EN, "just some text");
        let extractor = StreamExtractor::new(&fetcher);
        assert!(matches!(
            extractor.extract_streams(&MediaDescriptor::new(DESCRIPTOR), Locale::En),
            Err(ManifestError::Parse { .. })
        ));
    }
}
