//! Concurrent part fetching
//!
//! Every media part of an episode is remuxed to its own temporary file by the
//! external tool. Up to `max_workers` tool processes run at once. All jobs run
//! to completion, then their outcomes are joined and aggregated: one failed
//! part fails the whole set, but never cancels its siblings.

use crate::manifest::Stream;
use crate::tool::{MediaTool, ToolError};
use rayon::prelude::*;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{info, warn};

/// Errors that can occur while fetching parts
#[derive(Debug, Error)]
pub enum FetchError {
    /// At least one part could not be fetched; every job still ran
    #[error("{} of {total} part download(s) failed: {}", .failures.len(), describe(.failures))]
    Aggregate {
        total: usize,
        failures: Vec<PartFailure>,
    },

    /// A pool needs at least one worker
    #[error("The number of download workers must be at least 1")]
    InvalidWorkerCount,

    /// The worker pool could not be created
    #[error("Failed to create download workers: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

/// Failure of a single part
#[derive(Debug)]
pub struct PartFailure {
    pub part_index: usize,
    pub error: ToolError,
}

fn describe(failures: &[PartFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("part #{}: {}", f.part_index, f.error))
        .collect::<Vec<_>>()
        .join("; ")
}

/// One media part to download
#[derive(Debug, Clone, PartialEq)]
pub struct FetchJob {
    /// Position of the part in the episode feed
    pub part_index: usize,
    /// Selected stream of the part
    pub stream: Stream,
    /// Temporary destination file
    pub dest_path: PathBuf,
}

/// Fetches all jobs with at most `max_workers` concurrent tool invocations
///
/// Blocks until every job has finished. On success the jobs are returned
/// ordered by `part_index`. Temporary files are never deleted here, not even
/// those of failed jobs.
///
/// # Errors
///
/// [`FetchError::Aggregate`] lists every failed part once all jobs are done.
pub fn fetch_all<T: MediaTool>(
    jobs: Vec<FetchJob>,
    max_workers: usize,
    tool: &T,
) -> Result<Vec<FetchJob>, FetchError> {
    if max_workers == 0 {
        return Err(FetchError::InvalidWorkerCount);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(max_workers)
        .thread_name(|index| format!("parkdl-fetch-{index}"))
        .build()?;

    let total = jobs.len();
    let outcomes: Vec<Result<(), ToolError>> = pool.install(|| {
        jobs.par_iter()
            .with_max_len(1)
            .map(|job| {
                info!(
                    part = job.part_index,
                    total,
                    resolution = %job.stream.resolution,
                    "downloading part"
                );
                tool.fetch_segment(&job.stream.url, &job.dest_path)
            })
            .collect()
    });

    let failures: Vec<PartFailure> = jobs
        .iter()
        .zip(outcomes)
        .filter_map(|(job, outcome)| {
            let error = outcome.err()?;
            warn!(part = job.part_index, error = %error, "part download failed");
            Some(PartFailure {
                part_index: job.part_index,
                error,
            })
        })
        .collect();

    if !failures.is_empty() {
        return Err(FetchError::Aggregate { total, failures });
    }

    let mut completed = jobs;
    completed.sort_by_key(|job| job.part_index);
    Ok(completed)
}
