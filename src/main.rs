//! lookout - run a capture loop from the command line, or manage face enrollments.

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;

use lookout_lib::capture::still::StillImageDevice;
use lookout_lib::capture::MediaDevice;
use lookout_lib::render::{SortKey, SortOrder};
use lookout_lib::session::{ErrorPayload, Mode, ResultPayload};
use lookout_lib::settings::Settings;
use lookout_lib::sink::EventSink;
use lookout_lib::CaptureLoopController;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Settings file (TOML).
    #[arg(long, env = "LOOKOUT_CONFIG", default_value = "lookout.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Capture, classify and print results until Ctrl-C (or after one cycle with --once).
    Run(RunArgs),
    /// Write the default settings to the config path.
    InitConfig,
    /// Manage the face recognition service's enrolled people.
    Faces {
        #[command(subcommand)]
        action: FacesAction,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Use an image file as the video source.
    #[arg(long, conflicts_with = "screen")]
    image: Option<PathBuf>,
    /// Capture the primary monitor (requires the `screen` feature).
    #[arg(long)]
    screen: bool,
    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,
    /// Seconds between captures; overrides the settings file.
    #[arg(long)]
    interval: Option<f64>,
    /// Minimum confidence (0-100); overrides the settings file.
    #[arg(long)]
    min_confidence: Option<f64>,
    #[arg(long, value_enum)]
    sort: Option<SortArg>,
    #[arg(long)]
    ascending: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum SortArg {
    Confidence,
    Label,
}

#[derive(Subcommand, Debug)]
enum FacesAction {
    List,
    Delete { name: String },
    /// Enroll every JPEG/PNG in DIR under the directory's name.
    Enroll { dir: PathBuf },
}

/// Prints each result set the way the results panel shows it.
struct PrintSink;

impl EventSink for PrintSink {
    fn on_result(&self, payload: &ResultPayload) {
        println!(
            "[{}] cycle {} ({}x{})",
            payload.timestamp, payload.cycle, payload.frame_width, payload.frame_height
        );
        if payload.detections.is_empty() {
            println!("  (nothing above threshold)");
        } else {
            for d in &payload.detections {
                match &d.detection.note {
                    Some(note) => println!("  {} [{}]", d.summary_line(), note),
                    None => println!("  {}", d.summary_line()),
                }
            }
        }
    }

    fn on_error(&self, payload: &ErrorPayload) {
        eprintln!("[{}] cycle {} failed: {}", payload.timestamp, payload.cycle, payload.message);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    lookout_lib::init_logging();
    let args = Args::parse();
    let mut settings = Settings::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    match args.command {
        Command::InitConfig => {
            settings.save(&args.config)?;
            println!("wrote {}", args.config.display());
        }
        Command::Faces { action } => run_faces(&settings, action).await?,
        Command::Run(run) => {
            if run.once {
                settings.mode = Mode::Once;
            }
            if let Some(secs) = run.interval {
                settings.capture_interval = secs;
            }
            if let Some(min) = run.min_confidence {
                settings.min_confidence = min;
            }
            if let Some(key) = run.sort {
                settings.sort.key = match key {
                    SortArg::Confidence => SortKey::Confidence,
                    SortArg::Label => SortKey::Label,
                };
            }
            if run.ascending {
                settings.sort.order = SortOrder::Ascending;
            }
            run_loop(&settings, open_device(&run)?).await?;
        }
    }
    Ok(())
}

fn open_device(run: &RunArgs) -> Result<Arc<dyn MediaDevice>> {
    if run.screen {
        return screen_device();
    }
    let path = run
        .image
        .clone()
        .ok_or_else(|| anyhow!("pass --image <file> or --screen"))?;
    Ok(Arc::new(StillImageDevice::new(path)))
}

#[cfg(feature = "screen")]
fn screen_device() -> Result<Arc<dyn MediaDevice>> {
    Ok(Arc::new(lookout_lib::capture::screen::ScreenDevice::new()))
}

#[cfg(not(feature = "screen"))]
fn screen_device() -> Result<Arc<dyn MediaDevice>> {
    Err(anyhow!("built without the `screen` feature"))
}

async fn run_loop(settings: &Settings, device: Arc<dyn MediaDevice>) -> Result<()> {
    let controller = CaptureLoopController::builder(device, settings.build_classifier()?)
        .sink(Arc::new(PrintSink))
        .webhook(settings.build_webhook()?)
        .build();

    controller
        .start(settings.session_config())
        .await
        .context("starting capture session")?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-C received");
            controller.stop();
        }
        _ = controller.wait_stopped() => {}
    }
    Ok(())
}

async fn run_faces(settings: &Settings, action: FacesAction) -> Result<()> {
    let client = settings.face_client();
    match action {
        FacesAction::List => {
            let folders = client.list_folders().await?;
            if folders.is_empty() {
                println!("no enrolled faces");
            }
            for name in folders {
                println!("{}", name);
            }
        }
        FacesAction::Delete { name } => println!("{}", client.delete_folder(&name).await?),
        FacesAction::Enroll { dir } => println!("{}", client.enroll_dir(&dir).await?),
    }
    Ok(())
}
