use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use rig_vision::compose::ImageCompositor;
use rig_vision::config::{AnalysisStage, RigConfig};
use rig_vision::edges::EdgeDetector;
use rig_vision::foreground::ForegroundExtractor;
use rig_vision::{DeviceManager, Orchestrator, RunOutcome, RunReport};

#[derive(Parser, Debug)]
#[command(
    name = "rig",
    version,
    about = "Two-camera capture, merge and analysis",
    disable_help_subcommand = true
)]
struct Cli {
    /// YAML configuration file; built-in defaults when omitted
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the output root directory
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Use the in-process mock cameras instead of hardware
    #[arg(long, action = ArgAction::SetTrue, global = true)]
    mock: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture one frame per camera, merge them and run the analysis stage
    Run {
        /// Analysis stage: foreground or edges
        #[arg(long)]
        stage: Option<AnalysisStage>,
        /// Print the run summary as JSON
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// List camera devices visible to the backend
    Devices,
    /// Merge two stored images side by side
    Merge { left: PathBuf, right: PathBuf },
    /// Extract the largest dark region of an image onto white
    Extract {
        image: PathBuf,
        #[arg(long)]
        cutoff: Option<u8>,
    },
    /// Canny edge map of an image
    Edges {
        image: PathBuf,
        #[arg(long)]
        low: Option<f32>,
        #[arg(long)]
        high: Option<f32>,
    },
}

fn main() -> ExitCode {
    setup_tracing();
    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "rig failed");
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn setup_tracing() {
    let directives = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    // Best-effort; avoid panics if already set
    let _ = tracing_subscriber::fmt()
        .with_env_filter(log_filter(directives.as_deref()))
        .try_init();
}

/// `RUST_LOG` directives when present and valid, else `info` so every
/// pipeline decision is reported.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn dispatch(cli: Cli) -> Result<ExitCode> {
    let mut cfg = load_config(cli.config.as_deref())?;
    if let Some(root) = cli.output {
        cfg.output_root = root;
    }

    match cli.command {
        Commands::Run { stage, json } => {
            if let Some(stage) = stage {
                cfg.analysis.stage = stage;
            }
            cfg.validate()?;
            if cli.mock {
                return run_pipeline(rig_vision::MockDeviceManager::demo_rig(), cfg, json);
            }
            run_hardware(cfg, json)
        }
        Commands::Devices => {
            if cli.mock {
                list_devices(&mut rig_vision::MockDeviceManager::demo_rig())?;
            } else {
                list_hardware()?;
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Merge { left, right } => {
            let store = cfg.store();
            let composite = ImageCompositor::new(&store).merge(&left, &right)?;
            println!(
                "merged {}x{} -> {}",
                composite.frame.width,
                composite.frame.height,
                composite.path.display()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Extract { image, cutoff } => {
            let store = cfg.store();
            let cutoff = cutoff.unwrap_or(cfg.analysis.cutoff);
            match ForegroundExtractor::new(&store, cutoff).extract(&image)? {
                Some(artifact) => println!("extracted -> {}", artifact.path().display()),
                None => println!("no foreground region found in {}", image.display()),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Edges { image, low, high } => {
            let store = cfg.store();
            let low = low.unwrap_or(cfg.analysis.edge_low);
            let high = high.unwrap_or(cfg.analysis.edge_high);
            let artifact = EdgeDetector::new(&store, low, high).detect(&image)?;
            println!("edges -> {}", artifact.path().display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<RigConfig> {
    match path {
        Some(p) => RigConfig::load(p).with_context(|| format!("loading {}", p.display())),
        None => Ok(RigConfig::default()),
    }
}

#[cfg(feature = "opencv")]
fn run_hardware(cfg: RigConfig, json: bool) -> Result<ExitCode> {
    run_pipeline(rig_vision::OpenCvDeviceManager::default(), cfg, json)
}

#[cfg(not(feature = "opencv"))]
fn run_hardware(_cfg: RigConfig, _json: bool) -> Result<ExitCode> {
    anyhow::bail!("no camera backend compiled in; rebuild with --features opencv or pass --mock")
}

#[cfg(feature = "opencv")]
fn list_hardware() -> Result<()> {
    list_devices(&mut rig_vision::OpenCvDeviceManager::default())
}

#[cfg(not(feature = "opencv"))]
fn list_hardware() -> Result<()> {
    println!("camera backends: mock (enable opencv via cargo features)");
    println!("hint: use 'rig devices --mock' to list the mock rig");
    Ok(())
}

fn list_devices(manager: &mut dyn DeviceManager) -> Result<()> {
    let devices = manager.enumerate()?;
    if devices.is_empty() {
        println!("no camera devices found");
    }
    for d in devices {
        println!("{}\t{}\t{}", d.index, d.name, d.driver);
    }
    Ok(())
}

fn run_pipeline<M: DeviceManager>(manager: M, cfg: RigConfig, json: bool) -> Result<ExitCode> {
    info!(
        root = %cfg.output_root.display(),
        stage = ?cfg.analysis.stage,
        "starting capture run"
    );
    let report = Orchestrator::new(manager, cfg).run()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&report.summary())?);
    } else {
        print_report(&report);
    }
    Ok(exit_code(&report.outcome))
}

fn exit_code(outcome: &RunOutcome) -> ExitCode {
    match outcome {
        RunOutcome::Completed { .. } => ExitCode::SUCCESS,
        RunOutcome::Aborted(_) => ExitCode::from(2),
        RunOutcome::PartialCapture { .. } | RunOutcome::SkewExceeded { .. } => ExitCode::from(3),
    }
}

fn print_report(report: &RunReport) {
    let summary = report.summary();
    println!("status: {}", summary.status);
    for f in &summary.frames {
        println!("camera-{} #{} -> {}", f.camera, f.index, f.path);
    }
    if let Some(p) = &summary.composite {
        println!("merged -> {p}");
    }
    if let Some(p) = &summary.artifact {
        println!("artifact -> {p}");
    }
    if let Some(d) = &summary.detail {
        println!("note: {d}");
    }
}
