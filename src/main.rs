//! DiscBurner - command-line front end
//!
//! Lists recorders, probes media, reports capacity and runs burn and erase
//! jobs in the background while drawing their progress.

use anyhow::{Result, anyhow, bail};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use discburner::burning::{Burner, JobHandle};
use discburner::core::{
    AppSettings, CapacityIndicator, Compilation, EraseJob, JobResult, Stage, VerificationLevel,
    format_capacity,
};
use discburner::device::drutil::DrutilSubsystem;
use discburner::device::simulated::{Scenario, SimulatedSubsystem};
use discburner::device::{
    DeviceSubsystem, RecorderDescriptor, check_recorder, list_recorders, probe,
};
use discburner::logging;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Parser)]
#[command(name = "disc-burner")]
#[command(about = "Burn files and folders to CD, DVD and Blu-ray media", version)]
struct Cli {
    /// Run against a simulated recorder instead of real hardware
    #[arg(long, global = true)]
    simulate: bool,

    /// Show debug output on the terminal
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List attached recorders and the media they support
    List,
    /// Show the media currently in a recorder
    Probe {
        /// Recorder index as shown by `list`
        #[arg(short, long, default_value_t = 0)]
        device: usize,
    },
    /// Report how much of the media the given files would use
    Capacity {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[arg(short, long, default_value_t = 0)]
        device: usize,
    },
    /// Burn files and folders to the media in a recorder
    Burn {
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        #[arg(short, long, default_value_t = 0)]
        device: usize,

        /// Volume label (defaults to today's date)
        #[arg(short, long)]
        label: Option<String>,

        /// Verification after writing: none, quick or full
        #[arg(long)]
        verify: Option<VerificationLevel>,

        /// Close the media so no further sessions can be added
        #[arg(long)]
        close: bool,

        /// Eject the media when done
        #[arg(long)]
        eject: bool,
    },
    /// Erase rewritable media
    Erase {
        #[arg(short, long, default_value_t = 0)]
        device: usize,

        /// Blank the whole disc instead of just the table of contents
        #[arg(long)]
        full: bool,

        /// Eject the media when done
        #[arg(long)]
        eject: bool,
    },
}

fn subsystem_for(simulate: bool) -> Arc<dyn DeviceSubsystem> {
    if simulate {
        log::info!("Simulation mode - no hardware will be touched");
        Arc::new(SimulatedSubsystem::new(
            Scenario::single_cd_writer().with_step_delay(Duration::from_millis(150)),
        ))
    } else {
        Arc::new(DrutilSubsystem::new())
    }
}

/// Pick a recorder by index and make sure the write engine can drive it
fn select_recorder(subsystem: &dyn DeviceSubsystem, index: usize) -> Result<RecorderDescriptor> {
    let recorders = list_recorders(subsystem)?;
    if recorders.is_empty() {
        bail!("No recorders found.");
    }
    let recorder = recorders
        .get(index)
        .cloned()
        .ok_or_else(|| anyhow!("No recorder {} (found {})", index, recorders.len()))?;

    let supported = check_recorder(subsystem, &recorder)?;
    log::debug!("Selected {} ({})", recorder.label(), supported);
    Ok(recorder)
}

fn compilation_for(
    subsystem: &dyn DeviceSubsystem,
    paths: &[PathBuf],
    recorder: RecorderDescriptor,
) -> Result<Compilation> {
    let mut compilation = Compilation::new();
    for path in paths {
        compilation.add_path(path)?;
    }
    compilation.select_recorder(Some(recorder));
    if let Err(e) = compilation.refresh_media(subsystem) {
        log::warn!("Could not read the media: {}", e);
    }
    Ok(compilation)
}

fn print_capacity(compilation: &Compilation) {
    let report = compilation.capacity();
    let filled = usize::from(report.percent) * 40 / 100;
    println!(
        "  [{}{}] {:>3}%",
        "■".repeat(filled),
        " ".repeat(40 - filled),
        report.percent
    );
    println!(
        "  Items: {}  Free: {}",
        format_capacity(report.total_image_bytes),
        report.free_text()
    );
    if report.indicator == CapacityIndicator::OverCapacity {
        println!("  The selection does not fit on the media.");
    }
}

/// Draw a job's progress until it reaches a terminal stage
fn follow<S: Stage>(handle: &mut JobHandle<S>) -> Result<()> {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{prefix:12} [{elapsed_precise}] [{bar:40.green/black}] {pos:>3}% {msg}")?
            .progress_chars("■ "),
    );

    while !handle.is_finished() {
        bar.set_prefix(handle.stage().display_text());
        if let Some(progress) = handle.poll_progress() {
            bar.set_position(u64::from(progress.snapshot.percent()));
            bar.set_message(progress.snapshot.status_text());
        }
        std::thread::sleep(POLL_INTERVAL);
    }

    bar.set_prefix(handle.stage().display_text());
    if let Some(progress) = handle.poll_progress() {
        bar.set_position(u64::from(progress.snapshot.percent()));
    }
    bar.finish_and_clear();
    log::debug!("{} progress updates were skipped", handle.missed_progress());
    Ok(())
}

fn report(result: &JobResult, status: &str) -> Result<()> {
    println!("{}", status);
    match result {
        JobResult::Succeeded { warnings } => {
            for warning in warnings {
                println!("  Warning: {}", warning);
            }
            Ok(())
        }
        JobResult::Cancelled => Ok(()),
        JobResult::Failed(e) => Err(anyhow!(e.clone())),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let settings = AppSettings::load();
    let subsystem = subsystem_for(cli.simulate || settings.simulate);

    match cli.command {
        Commands::List => {
            let recorders = list_recorders(subsystem.as_ref())?;
            if recorders.is_empty() {
                println!("No recorders found.");
                return Ok(());
            }

            println!("Found {} recorder(s):", recorders.len());
            for (index, recorder) in recorders.iter().enumerate() {
                println!("  {:>2}  {}", index, recorder.label());
                println!("      {}", recorder.supported_media_summary());
            }
        }
        Commands::Probe { device } => {
            let recorder = select_recorder(subsystem.as_ref(), device)?;
            let media = probe(subsystem.as_ref(), &recorder)?;

            println!("{}", recorder.label());
            println!("  Media:    {}", media.media_type.display_name());
            println!("  Blank:    {}", if media.heuristically_blank { "yes" } else { "no" });
            println!("  Free:     {}", format_capacity(media.free_bytes));
            println!("  Sessions: {}", media.session_count());
        }
        Commands::Capacity { paths, device } => {
            let recorder = select_recorder(subsystem.as_ref(), device)?;
            let compilation = compilation_for(subsystem.as_ref(), &paths, recorder)?;
            print_capacity(&compilation);
        }
        Commands::Burn {
            paths,
            device,
            label,
            verify,
            close,
            eject,
        } => {
            let recorder = select_recorder(subsystem.as_ref(), device)?;
            let mut compilation = compilation_for(subsystem.as_ref(), &paths, recorder)?;
            print_capacity(&compilation);
            if !compilation.capacity().fits() {
                bail!("Not enough free space on the media.");
            }

            let mut job_settings = settings.clone();
            if label.is_some() {
                job_settings.volume_label = label;
            }
            if let Some(level) = verify {
                job_settings.verification = level;
            }
            job_settings.close_media |= close;
            job_settings.eject_after_burn |= eject;

            let job = compilation
                .burn_job(&job_settings)
                .ok_or_else(|| anyhow!("Nothing to burn."))?;
            println!("Burning volume \"{}\"", job.volume_label);

            let burner = Burner::new(subsystem.clone());
            let mut handle = burner.start_burn(job)?;
            if let Some(cancel) = handle.cancel_token() {
                ctrlc::set_handler(move || {
                    eprintln!("\nCancelling...");
                    cancel.cancel();
                })?;
            }

            follow(&mut handle)?;
            let result = handle.await_result();
            compilation.job_finished(&result);
            report(&result, result.burn_status_text())?;
        }
        Commands::Erase { device, full, eject } => {
            let recorder = select_recorder(subsystem.as_ref(), device)?;

            let mut job = EraseJob::from_settings(recorder, &settings);
            job.full_erase |= full;
            job.eject |= eject;

            let burner = Burner::new(subsystem.clone());
            let mut handle = burner.start_erase(job)?;

            follow(&mut handle)?;
            let result = handle.await_result();
            report(&result, result.erase_status_text())?;
        }
    }

    Ok(())
}
