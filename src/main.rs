use clap::{Parser, ValueEnum};
use pbase_mirror::cancel::CancelFlag;
use pbase_mirror::client::{ClientSettings, PbaseClient};
use pbase_mirror::config::{self, Overrides};
use pbase_mirror::gallery::GalleryRef;
use pbase_mirror::mirror::{self, MirrorOptions};
use pbase_mirror::output;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Exit status for a run stopped by Ctrl-C or `--timeout`.
const EXIT_CANCELLED: i32 = 130;

#[derive(Parser)]
#[command(name = "pbase-mirror")]
#[command(about = "Mirror a PBase account: every gallery, the largest size of every image")]
#[command(long_about = "\
Mirror a PBase account: every gallery, the largest size of every image

Logs in, walks the gallery tree from each start point (default:
<username>/root) and saves each image once, at the largest size offered
(original > large > medium > displayed).

Files are named after the gallery title and image caption:

  downloads/
  ├── Trip 2024 - Sunset.jpg       # gallery title + caption
  ├── Trip 2024 - Sunset_1.jpg     # same name, different image
  ├── DSC_0012.JPG                 # no title or caption: original name
  └── .pbase-mirror.json           # what was saved from where

Rerunning into the same directory skips everything already mirrored and
never overwrites a file.

Settings are read from ./pbase-mirror.toml (or --config). Run
'pbase-mirror --gen-config' to print a documented one.")]
#[command(version)]
struct Cli {
    /// PBase account name
    #[arg(long, required_unless_present = "gen_config")]
    username: Option<String>,

    /// Account password (prompted when omitted)
    #[arg(long)]
    password: Option<String>,

    /// Output directory
    #[arg(long)]
    output: Option<PathBuf>,

    /// Gallery to start from, as a path or URL (repeatable)
    #[arg(long = "start", value_name = "PATH_OR_URL")]
    start: Vec<String>,

    /// Site to mirror from
    #[arg(long)]
    base_url: Option<String>,

    /// Seconds between requests
    #[arg(long)]
    delay: Option<f64>,

    #[arg(long, value_enum, default_value_t = LogLevel::Info, ignore_case = true)]
    log_level: LogLevel,

    /// Config file (default: ./pbase-mirror.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Images processed in parallel
    #[arg(long)]
    workers: Option<usize>,

    /// Stop at the first gallery that cannot be fetched
    #[arg(long)]
    fail_fast: bool,

    /// Stop the whole run after this many seconds
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Write the run report as JSON
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Print a stock pbase-mirror.toml with all options documented
    #[arg(long)]
    gen_config: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogLevel {
    #[value(name = "DEBUG")]
    Debug,
    #[value(name = "INFO")]
    Info,
    #[value(name = "WARNING")]
    Warning,
    #[value(name = "ERROR")]
    Error,
}

impl LogLevel {
    fn directive(self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if cli.gen_config {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }
    init_logging(cli.log_level);

    let mut config = config::load_config(cli.config.as_deref())?;
    config.apply(&Overrides {
        base_url: cli.base_url.clone(),
        output: cli.output.clone(),
        delay: cli.delay,
        workers: cli.workers,
        fail_fast: cli.fail_fast,
    });
    config.validate()?;

    let username = cli.username.clone().ok_or("--username is required")?;
    let password = match cli.password.clone() {
        Some(password) => password,
        None => dialoguer::Password::new()
            .with_prompt(format!("PBase password for {username}"))
            .interact()?,
    };

    let settings = ClientSettings::from_config(&config)?;
    let client = PbaseClient::new(&settings);

    let start_inputs = if cli.start.is_empty() {
        vec![format!("{username}/root")]
    } else {
        cli.start.clone()
    };
    let start_points = start_inputs
        .iter()
        .map(|input| {
            GalleryRef::parse(input, client.root())
                .map_err(|e| format!("invalid start point {input:?}: {e}"))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut cancel = CancelFlag::new();
    if let Some(seconds) = cli.timeout {
        cancel = cancel.with_deadline(Duration::from_secs(seconds));
    }
    let handler_flag = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || handler_flag.cancel()) {
        warn!(error = %e, "could not install Ctrl-C handler");
    }

    if let Err(e) = client.login(&username, &password) {
        error!(error = %e, "login failed");
        return Err(e.into());
    }

    let options = MirrorOptions {
        output_dir: config.output.clone(),
        start_points,
        policy: config.on_gallery_error,
        workers: config::effective_workers(&config.processing),
        max_base_len: config.naming.max_base_len,
    };

    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in output::format_mirror_event(&event) {
                println!("{}", line);
            }
        }
    });
    let result = mirror::run(&client, &options, &cancel, Some(tx));
    if printer.join().is_err() {
        warn!("progress printer panicked");
    }
    let report = match result {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "mirror stopped");
            return Err(e.into());
        }
    };

    output::print_summary(&report);
    if let Some(path) = &cli.report {
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "report written");
    }

    if report.cancelled {
        std::process::exit(EXIT_CANCELLED);
    }
    Ok(())
}

/// Diagnostics go to stderr so stdout stays a clean inventory. `RUST_LOG`
/// takes precedence over `--log-level`.
fn init_logging(level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("pbase_mirror={}", level.directive())));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
