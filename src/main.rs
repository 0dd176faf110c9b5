use clap::Parser;
use dialoguer::{Confirm, Select};
use humansize::{DECIMAL, format_size};
use parkdl::{
    CarouselCatalog, CatalogError, DomainTable, DownloadError, DownloadOptions, Downloader,
    Episode, FfmpegTool, HttpError, Locale, ProgressEvent, QualityPolicy, ReqwestFetcher,
    Selection, SelectionError, Session, output_path, resolve_all, resolve_selection,
};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Download South Park episodes from the official streaming sites
#[derive(Debug, Parser)]
#[command(name = "parkdl", version, about)]
struct Cli {
    /// Episodes to download, e.g. "S01E05", "S02-S03", "S1E5-S1E8,S4" or "all"
    what: String,

    /// Output path template; {season}, {episode}, {number} and {title} are replaced
    #[arg(short, long, default_value = "South Park/Season {season}/{episode} - {title}.mp4")]
    path: String,

    /// Language of the episodes (en, uk, es, de, se)
    #[arg(short, long, default_value_t = Locale::En)]
    language: Locale,

    /// Stream quality: max, median, min or a resolution like 1920x1080
    #[arg(short, long, default_value_t = QualityPolicy::Max)]
    quality: QualityPolicy,

    /// ffmpeg binary to use
    #[arg(long, env = "PARKDL_FFMPEG")]
    ffmpeg_binary: Option<PathBuf>,

    /// Maximum number of parts downloaded at the same time
    #[arg(short, long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..))]
    threads: u16,

    /// Directory for temporary part files
    #[arg(long)]
    tempdir: Option<PathBuf>,

    /// How often failed requests are retried
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Do not ask for confirmation
    #[arg(short, long)]
    yes: bool,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Error)]
enum CliError {
    #[error("{0}")]
    Selection(#[from] SelectionError),

    #[error("{0}")]
    Catalog(#[from] CatalogError),

    #[error("{0}")]
    Http(#[from] HttpError),

    #[error("ffmpeg not found at {}. Install ffmpeg or pass --ffmpeg-binary", .0.display())]
    FfmpegMissing(PathBuf),

    #[error("Failed to create temporary directory: {0}")]
    Session(#[source] io::Error),

    #[error("Failed to install interrupt handler: {0}")]
    Interrupt(#[from] ctrlc::Error),

    #[error("Prompt failed: {0}")]
    Prompt(#[from] dialoguer::Error),
}

/// What the user asked for on the command line
enum Request {
    All,
    Selection(Selection),
}

impl Request {
    fn parse(what: &str) -> Result<Self, SelectionError> {
        if what.trim().eq_ignore_ascii_case("all") {
            Ok(Request::All)
        } else {
            Selection::parse(what).map(Request::Selection)
        }
    }
}

/// Handles progress events and prints formatted output to stdout
fn handle_progress_event(event: ProgressEvent) {
    match event {
        ProgressEvent::ResolvingFeed { .. } => {
            println!("  Resolving media parts...");
        }
        ProgressEvent::PartsResolved { count } => {
            println!("  Found {} part(s)", count);
        }
        ProgressEvent::StreamSelected {
            part_index,
            total,
            resolution,
            duration,
        } => match duration {
            Some(duration) => println!(
                "  [{}/{}] Selected {} ({}:{:02})",
                part_index + 1,
                total,
                resolution,
                duration.as_secs() / 60,
                duration.as_secs() % 60
            ),
            None => println!("  [{}/{}] Selected {}", part_index + 1, total, resolution),
        },
        ProgressEvent::Downloading { parts, workers } => {
            println!("  Downloading {} part(s) with {} worker(s)...", parts, workers);
        }
        ProgressEvent::Merging { .. } => {
            println!("  Merging parts...");
        }
        ProgressEvent::Complete { output } => {
            let size = fs::metadata(&output).map(|m| m.len()).unwrap_or(0);
            println!("  Saved {} ({})", output.display(), format_size(size, DECIMAL));
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .compact()
        .init();
}

fn label(episode: &Episode) -> String {
    format!("S{}E{}", episode.season, episode.episode_in_season)
}

/// Asks whether to continue after an interrupt; anything but the first choice aborts
fn continue_after_interrupt(episode: &Episode, finished: bool) -> bool {
    let (prompt, proceed) = if finished {
        ("Interrupted after finishing", "Continue with the next episode")
    } else {
        ("Interrupted while downloading", "Skip this episode and continue")
    };
    let choice = Select::new()
        .with_prompt(format!("{} {}", prompt, label(episode)))
        .items(&[proceed, "Abort"])
        .default(0)
        .interact();

    matches!(choice, Ok(0))
}

/// Runs the batch, returning whether every requested episode was downloaded
fn run(cli: Cli) -> Result<bool, CliError> {
    // Fail on malformed input before touching network or processes
    let request = Request::parse(&cli.what)?;

    let tool = match &cli.ffmpeg_binary {
        Some(binary) => FfmpegTool::with_binary(binary),
        None => FfmpegTool::new(),
    };
    if !tool.is_installed() {
        return Err(CliError::FfmpegMissing(tool.binary().to_path_buf()));
    }

    let fetcher = ReqwestFetcher::new(cli.retries)?;

    println!("Looking up episodes...");
    let catalog = CarouselCatalog::new(&fetcher, cli.language);
    let episodes = match &request {
        Request::All => resolve_all(&catalog)?,
        Request::Selection(selection) => resolve_selection(&catalog, selection)?,
    };

    if episodes.is_empty() {
        println!("No episodes found.");
        return Ok(true);
    }

    let planned: Vec<(Episode, PathBuf)> = episodes
        .into_iter()
        .map(|episode| {
            let path = output_path(&cli.path, &episode);
            (episode, path)
        })
        .collect();

    println!("\n=== Episodes ===\n");
    for (episode, path) in &planned {
        println!("{} - {}", label(episode), episode.title);
        println!("  -> {}", path.display());
    }
    println!(
        "\nLanguage: {}, quality: {}, workers: {}",
        cli.language, cli.quality, cli.threads
    );

    if !cli.yes {
        let confirmed = Confirm::new()
            .with_prompt(format!("Download {} episode(s)?", planned.len()))
            .default(true)
            .interact()?;
        if !confirmed {
            println!("Nothing downloaded.");
            return Ok(true);
        }
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || interrupted.store(true, Ordering::SeqCst))?;
    }

    let session = Session::create(cli.tempdir.as_deref()).map_err(CliError::Session)?;
    let options = DownloadOptions {
        quality: cli.quality,
        max_workers: usize::from(cli.threads),
    };
    let downloader = Downloader::new(&fetcher, &tool, DomainTable::default(), options)
        .with_interrupt(&interrupted);

    let total = planned.len();
    let mut completed = 0;
    let mut failed = Vec::new();

    for (index, (episode, path)) in planned.iter().enumerate() {
        println!(
            "\n[{}/{}] {} - {}",
            index + 1,
            total,
            label(episode),
            episode.title
        );

        let outcome = downloader.download_episode(episode, path, &session, handle_progress_event);
        let was_interrupted = downloader.take_interrupt();

        match &outcome {
            Ok(_) => completed += 1,
            Err(e) if was_interrupted => {
                if !matches!(e, DownloadError::Interrupted) {
                    tracing::debug!(error = %e, "episode failed after interrupt");
                }
                println!("  Interrupted, downloaded parts were removed.");
                failed.push(episode.id.clone());
            }
            Err(e) => {
                let hint = if e.is_transient() {
                    " (temporary, try again later)"
                } else {
                    ""
                };
                eprintln!("  Failed {} [{}]: {}{}", label(episode), episode.id, e, hint);
                failed.push(episode.id.clone());
            }
        }

        if was_interrupted && !continue_after_interrupt(episode, outcome.is_ok()) {
            println!("Aborting.");
            break;
        }
    }

    println!("\nDownloaded {} of {} episode(s).", completed, total);
    if !failed.is_empty() {
        println!("Not downloaded: {}", failed.join(", "));
    }

    Ok(completed == total)
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}
