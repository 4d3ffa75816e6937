//! redub - Automated Video Dubbing
//!
//! Command line front end: selects the video, languages and voice, shows
//! progress while the pipeline runs and saves the dubbed result.

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{Level, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use redub::cli::{Args, Commands};
use redub::config::Config;
use redub::extract::TrackExtractor;
use redub::media::MediaBackendFactory;
use redub::model::{LanguageId, MediaFile, VoiceId};
use redub::orchestrator::{Collaborators, DubRequest, Orchestrator};
use redub::output;
use redub::progress::{PipelineStage, ProgressObserver, ProgressReport};
use redub::timing::CancelToken;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let _log_guard = setup_logging(args.verbose)?;
    info!("Starting redub - Automated Video Dubbing");

    let config = match &args.config {
        Some(config_path) => Config::from_file(config_path)?,
        None => {
            if Path::new("redub.toml").exists() {
                info!("Found redub.toml in current directory, loading...");
                Config::from_file("redub.toml")?
            } else {
                Config::default()
            }
        }
    };

    match args.command {
        Commands::Dub { input, source, target, voice, output: output_path, export_text } => {
            let source = LanguageId::new(source);
            let target = LanguageId::new(target);
            config.validate_language(&source)?;
            config.validate_language(&target)?;

            let voice = match voice {
                Some(voice) => VoiceId::new(voice),
                None => config.default_voice(),
            };
            config.validate_voice(&voice)?;

            info!("Dubbing {}: {} -> {} with voice {}", input.display(), source, target, voice);
            let video = MediaFile::from_path(&input).await?;

            let collaborators = Collaborators::from_config(&config)?;
            let mut orchestrator = Orchestrator::new(&config, collaborators)
                .with_observer(Arc::new(BarObserver::new()));

            let cancel = orchestrator.cancel_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupted, cancelling the current run");
                    cancel.cancel();
                }
            });

            let dubbed = orchestrator
                .run(DubRequest {
                    video: Some(video),
                    source,
                    target,
                    voice,
                })
                .await?;

            let dir = input
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from("."));
            let saved = output::save_video(&dubbed, output_path.as_deref(), &dir).await?;
            println!("Dubbed video saved to {}", saved.display());
            println!("Duration: {} (source {})", dubbed.output_duration, dubbed.duration);

            if export_text {
                let texts = output::export_texts(&dubbed, &saved).await?;
                println!("Transcript and translation saved to {}", texts.display());
            }
        }
        Commands::Extract { input, output } => {
            info!("Extracting audio from: {}", input.display());

            let media = MediaBackendFactory::create_backend(config.media.clone());
            media.check_availability()?;

            let video = MediaFile::from_path(&input).await?;
            let extractor = TrackExtractor::new(media, config.media.timeouts());
            let extracted = extractor.extract(&video, &CancelToken::new()).await?;

            fs::write(&output, extracted.audio.bytes()).await?;
            println!(
                "Extracted {} bytes of {} audio ({}) to {}",
                extracted.audio.size(),
                extracted.audio.mime_type(),
                extracted.duration,
                output.display()
            );
        }
        Commands::Languages => {
            println!("\nSupported Languages:");
            println!("{:<15} {:<20}", "Id", "Name");
            println!("{}", "-".repeat(35));
            for (id, name) in config.languages.iter() {
                println!("{:<15} {:<20}", id, name);
            }
        }
        Commands::Voices => {
            println!("\nAvailable Voices:");
            for (index, voice) in config.voices.iter().enumerate() {
                let marker = if index == 0 { " (default)" } else { "" };
                println!("  {}{}", voice, marker);
            }
        }
        Commands::InitConfig { path } => {
            if path.exists() {
                anyhow::bail!("{} already exists", path.display());
            }
            Config::default().save_to_file(&path)?;
            println!("Default configuration written to {}", path.display());
        }
    }

    info!("redub finished successfully");
    Ok(())
}

/// Renders run progress as a terminal progress bar
struct BarObserver {
    bar: ProgressBar,
}

impl BarObserver {
    fn new() -> Self {
        let bar = ProgressBar::new(100);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:40}] {pos:>3}% {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Self { bar }
    }
}

impl ProgressObserver for BarObserver {
    fn on_progress(&self, report: &ProgressReport) {
        self.bar.set_position(report.percent as u64);
        match report.stage {
            PipelineStage::Completed => self.bar.finish_with_message(report.label.clone()),
            PipelineStage::Failed => self.bar.abandon_with_message(report.label.clone()),
            _ => self.bar.set_message(report.label.clone()),
        }
    }
}

/// Setup logging to both console and file
fn setup_logging(verbose: bool) -> Result<WorkerGuard> {
    let log_dir = std::env::current_dir()?.join(".redub").join("log");
    std::fs::create_dir_all(&log_dir)?;

    // Daily rotation; the guard flushes the file writer on exit
    let file_appender = rolling::daily(&log_dir, "redub.log");
    let (non_blocking_file, guard) = non_blocking(file_appender);

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let console_layer = fmt::layer()
        .with_target(false)
        .with_file(verbose)
        .with_line_number(verbose);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_file)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(log_level.into()))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!(
        "Logging initialized - console: {}, file: {}",
        log_level,
        log_dir.join("redub.log").display()
    );

    Ok(guard)
}
