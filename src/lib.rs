//! parkdl - Download South Park episodes from the official streaming sites
//!
//! This library resolves episode selections against the season catalog, walks
//! an episode's feed and manifests down to concrete HLS streams, fetches all
//! parts concurrently through ffmpeg and merges them into one tagged file.

mod catalog;
mod feed;
mod fetcher;
mod http;
mod locale;
mod manifest;
mod merger;
mod output;
mod quality;
mod selection;
mod session;
mod tool;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

// Re-export error types
pub use catalog::CatalogError;
pub use feed::FeedError;
pub use fetcher::{FetchError, PartFailure};
pub use http::HttpError;
pub use locale::LocaleError;
pub use manifest::ManifestError;
pub use merger::MergeError;
pub use output::OutputError;
pub use quality::QualityError;
pub use selection::SelectionError;
pub use tool::ToolError;

// Re-export pipeline types
pub use catalog::{CarouselCatalog, Episode, SeasonCatalog, resolve_all, resolve_selection};
pub use feed::{FeedResolver, MediaDescriptor};
pub use fetcher::{FetchJob, fetch_all};
pub use http::{HttpFetcher, ReqwestFetcher};
pub use locale::{DomainTable, FeedFormat, Locale, ProviderDomains};
pub use manifest::{PartManifest, Stream, StreamExtractor, manifest_url};
pub use merger::{MergeRequest, merge, metadata_tags};
pub use output::{
    DIRECTORY_TEMPLATE, expand_template, output_path, prepare_output, sanitize_filename,
};
pub use quality::{QualityPolicy, Resolution};
pub use selection::{EpisodeRef, Selection, Selector};
pub use session::Session;
pub use tool::{FfmpegTool, MediaTool};

/// Progress event emitted while downloading an episode
///
/// These events allow library users to track progress and provide feedback
/// during a download.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// Looking up the episode's feed
    ResolvingFeed { episode_id: String },

    /// The feed lists this many media parts
    PartsResolved { count: usize },

    /// A stream was chosen for one part
    StreamSelected {
        part_index: usize,
        total: usize,
        resolution: Resolution,
        /// Playing time of the part, when the manifest lists one
        duration: Option<Duration>,
    },

    /// Part downloads were dispatched
    Downloading { parts: usize, workers: usize },

    /// Parts are being joined into the output file
    Merging { output: PathBuf },

    /// The episode was written
    Complete { output: PathBuf },
}

/// Tunables of a download
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Rule picking one stream per part
    pub quality: QualityPolicy,
    /// Maximum number of concurrently running part downloads
    pub max_workers: usize,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            quality: QualityPolicy::Max,
            max_workers: 4,
        }
    }
}

/// Top-level error type for episode downloads
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Error while resolving the episode feed
    #[error("Feed error: {0}")]
    Feed(#[from] FeedError),

    /// Error while extracting streams
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Error while selecting a stream
    #[error("Quality selection error: {0}")]
    Quality(#[from] QualityError),

    /// Error while fetching parts
    #[error("Download error: {0}")]
    Fetch(#[from] FetchError),

    /// Error while merging parts
    #[error("Merge error: {0}")]
    Merge(#[from] MergeError),

    /// The output location cannot be used
    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    /// The download was interrupted by the user
    #[error("Download interrupted")]
    Interrupted,
}

impl DownloadError {
    /// Whether retrying the same episode later might succeed
    ///
    /// Network unavailability and failed transfers are transient, while
    /// malformed documents, missing streams and local problems are not.
    pub fn is_transient(&self) -> bool {
        match self {
            DownloadError::Feed(FeedError::Unavailable { .. }) => true,
            DownloadError::Manifest(ManifestError::Unavailable { .. }) => true,
            DownloadError::Fetch(FetchError::Aggregate { failures, .. }) => failures
                .iter()
                .all(|f| matches!(f.error, ToolError::Failed { .. })),
            _ => false,
        }
    }
}

/// Downloads single episodes
///
/// Holds the collaborators of the pipeline: the HTTP transport used for feeds
/// and manifests, and the media tool used for fetching and merging.
pub struct Downloader<'a, F: HttpFetcher, T: MediaTool> {
    feed: FeedResolver<'a, F>,
    extractor: StreamExtractor<'a, F>,
    tool: &'a T,
    options: DownloadOptions,
    interrupt: Option<&'a AtomicBool>,
}

impl<'a, F: HttpFetcher, T: MediaTool> Downloader<'a, F, T> {
    pub fn new(fetcher: &'a F, tool: &'a T, domains: DomainTable, options: DownloadOptions) -> Self {
        Self {
            feed: FeedResolver::new(fetcher, domains),
            extractor: StreamExtractor::new(fetcher),
            tool,
            options,
            interrupt: None,
        }
    }

    /// Stops downloads at the next stage boundary once `flag` is set
    pub fn with_interrupt(mut self, flag: &'a AtomicBool) -> Self {
        self.interrupt = Some(flag);
        self
    }

    /// Reports and clears an interrupt raised since the last call
    ///
    /// An interrupt arriving after the last stage boundary of an episode does
    /// not fail it; callers check this after every episode so the interrupt is
    /// attributed to that episode instead of the next one.
    pub fn take_interrupt(&self) -> bool {
        self.interrupt
            .is_some_and(|flag| flag.swap(false, Ordering::SeqCst))
    }

    fn check_interrupt(&self) -> Result<(), DownloadError> {
        match self.interrupt {
            Some(flag) if flag.load(Ordering::SeqCst) => Err(DownloadError::Interrupted),
            _ => Ok(()),
        }
    }

    /// Downloads one episode into `output`
    ///
    /// Resolves the episode's media parts, selects one stream per part, fetches
    /// all parts into the session directory and merges them in feed order.
    ///
    /// Progress events are emitted through the provided callback, allowing
    /// library users to track progress, display status, or remain silent.
    ///
    /// # Errors
    ///
    /// Any stage failure aborts the episode. Part files written so far are
    /// removed and no file is left at `output`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use parkdl::{
    ///     DomainTable, DownloadOptions, Downloader, FfmpegTool, ProgressEvent, ReqwestFetcher,
    ///     Session,
    /// };
    /// # use parkdl::Episode;
    /// # fn run(episode: &Episode) -> Result<(), Box<dyn std::error::Error>> {
    /// let fetcher = ReqwestFetcher::new(3)?;
    /// let tool = FfmpegTool::new();
    /// let session = Session::create(None)?;
    /// let downloader = Downloader::new(&fetcher, &tool, DomainTable::default(), DownloadOptions::default());
    ///
    /// downloader.download_episode(
    ///     episode,
    ///     std::path::Path::new("S01E01.mp4"),
    ///     &session,
    ///     |event| {
    ///         if let ProgressEvent::Complete { output } = event {
    ///             println!("Saved {}", output.display());
    ///         }
    ///     },
    /// )?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn download_episode<P>(
        &self,
        episode: &Episode,
        output: &Path,
        session: &Session,
        mut progress: P,
    ) -> Result<PathBuf, DownloadError>
    where
        P: FnMut(ProgressEvent),
    {
        info!(
            episode = %episode.id,
            title = %episode.title,
            season = %episode.season,
            number = %episode.episode_in_season,
            output = %output.display(),
            "downloading episode"
        );

        progress(ProgressEvent::ResolvingFeed {
            episode_id: episode.id.clone(),
        });
        let descriptors = self.feed.resolve_media(episode)?;
        let total = descriptors.len();
        progress(ProgressEvent::PartsResolved { count: total });

        let mut jobs = Vec::with_capacity(total);
        for (part_index, descriptor) in descriptors.iter().enumerate() {
            self.check_interrupt()?;

            let manifest = self.extractor.part_manifest(descriptor, episode.locale)?;
            let streams = self
                .extractor
                .streams(&manifest, &manifest_url(descriptor, episode.locale))?;
            let stream = self.options.quality.select(&streams)?.clone();
            let duration = manifest.duration();

            info!(
                part = part_index,
                resolution = %stream.resolution,
                seconds = duration.map(|d| d.as_secs()),
                "stream selected"
            );
            progress(ProgressEvent::StreamSelected {
                part_index,
                total,
                resolution: stream.resolution,
                duration,
            });
            jobs.push(FetchJob {
                part_index,
                stream,
                dest_path: session.part_path(&episode.id, part_index),
            });
        }

        prepare_output(output)?;
        self.check_interrupt()?;

        progress(ProgressEvent::Downloading {
            parts: total,
            workers: self.options.max_workers,
        });

        let fetched = fetch_all(jobs, self.options.max_workers, self.tool)
            .map_err(DownloadError::from)
            .and_then(|jobs| self.check_interrupt().map(|()| jobs));
        let fetched = match fetched {
            Ok(jobs) => jobs,
            Err(e) => {
                warn!(episode = %episode.id, error = %e, "discarding downloaded parts");
                session.discard_parts(&episode.id, total);
                return Err(e);
            }
        };

        progress(ProgressEvent::Merging {
            output: output.to_path_buf(),
        });
        let merged = merge(
            MergeRequest {
                parts: fetched.into_iter().map(|job| job.dest_path).collect(),
                episode: episode.clone(),
                output: output.to_path_buf(),
            },
            self.tool,
        )?;

        info!(episode = %episode.id, output = %merged.display(), "episode done");
        progress(ProgressEvent::Complete {
            output: merged.clone(),
        });

        Ok(merged)
    }
}
