use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use clip_bus::{
    CompositionBuilder, ExportEvent, ExportJob, ExportOutcome, ExportSettings, JobRegistry, Journey,
    JourneySegmenter, JsonJourneyNames, MediaClipProbe, OutputContainer, ProgressCoordinator,
    journey::format_time_interval,
};
use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};

use crate::cli::{Cli, Commands, ExportArgs, journey_index};

mod cli;
mod config;

fn init_logging() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .filter_module("ffmpeg_next", log::LevelFilter::Warn)
        .filter_module("clip_bus", log::LevelFilter::Debug)
        .init();
}

/// Progress steps per export; events carry percent with one decimal.
const BAR_STEPS: u64 = 1000;

fn progress_bar(total_secs: f64) -> ProgressBar {
    let pb = ProgressBar::new(BAR_STEPS);
    match ProgressStyle::default_bar().template("  {percent:>3}% [{bar:30}] {msg} (eta {eta})") {
        Ok(style) => pb.set_style(style.progress_chars("##.")),
        Err(e) => log::debug!("progress template rejected: {}", e),
    }
    pb.set_message(format!("{} / {}", format_time_interval(0.0), format_time_interval(total_secs)));
    pb
}

fn print_journeys(journeys: &[Journey]) {
    for (i, journey) in journeys.iter().enumerate() {
        let label = journey.name().map(str::to_string).unwrap_or_else(|| journey.merged_name(false));
        println!(
            "{:>3}. {} ({} clips, {})",
            i + 1,
            label,
            journey.len(),
            format_time_interval(journey.duration())
        );
    }
}

async fn export(journey: Journey, settings: ExportSettings, folder: &Path) -> anyhow::Result<ExportOutcome> {
    let cfg = config::config();
    let key = journey.key();
    let output = folder.join(journey.merged_name(!settings.is_passthrough()));
    let total = journey.duration();

    let composition = CompositionBuilder.build_async(journey).await?;
    let job = ExportJob::new(composition)
        .output(&output, OutputContainer::Mp4)
        .settings(settings);

    let registry = JobRegistry::default();
    let coordinator = ProgressCoordinator::new(cfg.progress_interval());
    let mut events = registry.start(&key, &coordinator, job)?;
    log::info!("exporting to {}", output.display());

    let pb = progress_bar(total);
    loop {
        tokio::select! {
            event = events.next() => match event {
                Some(ExportEvent::Started) => pb.reset_elapsed(),
                Some(ExportEvent::Progress(percent)) => {
                    pb.set_position((percent * BAR_STEPS as f64 / 100.0).round() as u64);
                    pb.set_message(format!(
                        "{} / {}",
                        format_time_interval(total * percent / 100.0),
                        format_time_interval(total)
                    ));
                }
                Some(ExportEvent::Done(outcome)) => {
                    if outcome == ExportOutcome::Completed {
                        pb.finish();
                    } else {
                        pb.abandon_with_message(outcome.to_string());
                    }
                    return Ok(outcome);
                }
                None => {
                    pb.abandon();
                    anyhow::bail!("export ended without an outcome");
                }
            },
            _ = tokio::signal::ctrl_c() => {
                pb.suspend(|| log::info!("ctrl+c received, cancelling"));
                registry.cancel(&key);
            },
        }
    }
}

fn select(journeys: Vec<Journey>, number: u32) -> anyhow::Result<Journey> {
    let count = journeys.len();
    journeys
        .into_iter()
        .nth(journey_index(number))
        .ok_or_else(|| anyhow::anyhow!("no journey {} (found {})", number, count))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let cfg = config::config();
    let segmenter = JourneySegmenter::new(Arc::new(MediaClipProbe)).with_gap_threshold(cfg.gap_threshold());
    let mut journeys = segmenter.segment_folder(&cli.folder).await?;
    let names = JsonJourneyNames::open(&cli.folder)?;
    journeys.iter_mut().for_each(|j| j.load_name(&names));

    match cli.command.unwrap_or(Commands::List) {
        Commands::List => print_journeys(&journeys),
        Commands::Rename(args) => {
            let mut journey = select(journeys, args.journey)?;
            let name = args.name();
            journey.rename(&names, &name)?;
            println!("renamed journey {} to {:?}", args.journey, name);
        }
        Commands::Export(ExportArgs {
            journey,
            resample,
            output,
        }) => {
            let journey = select(journeys, journey)?;
            let settings = if resample {
                cfg.resample_settings()
            } else {
                ExportSettings::joined()
            };
            let folder = output.unwrap_or_else(|| cfg.output_folder().to_path_buf());
            match export(journey, settings, &folder).await? {
                ExportOutcome::Completed => println!("done"),
                ExportOutcome::Cancelled => println!("cancelled"),
                ExportOutcome::Failed(e) => anyhow::bail!(e),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();
    clip_bus::init()?;

    let cli = Cli::parse();
    if !cli.folder.is_dir() {
        anyhow::bail!("{} is not a folder", cli.folder.display());
    }
    run(cli).await
}
