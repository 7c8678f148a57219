use clap::Parser;
use crossterm::tty::IsTty;
use goveewatch::app::{self, LogTarget, Options, RunError};
use goveewatch::config::{self, ConfigError};
use goveewatch::display::{self, TerminalDisplay};
use goveewatch::scanner;
use log::{error, info};
use std::fs::OpenOptions;
use std::io;
use std::panic::{self, PanicHookInfo};
use std::path::Path;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

/// Install the logger. Nothing is installed when the only destination would
/// be the terminal the table is drawn on.
fn init_logging(verbose: bool, target: LogTarget) -> io::Result<()> {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Warn
    };
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(level)
        .parse_default_env()
        .format_timestamp_secs();

    match target {
        LogTarget::File(path) => {
            builder.target(env_logger::Target::Pipe(Box::new(open_log_file(&path)?)));
        }
        LogTarget::Stderr => {}
        LogTarget::Discard => return Ok(()),
    }
    builder.init();
    Ok(())
}

fn open_log_file(path: &Path) -> io::Result<std::fs::File> {
    OpenOptions::new().create(true).append(true).open(path).map_err(|e| {
        io::Error::new(e.kind(), format!("{}: {e}", path.display()))
    })
}

async fn wait_for_interrupt() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("cannot listen for interrupt: {e}");
        std::future::pending::<()>().await;
    }
}

/// Load aliases, take over the terminal and run until interrupted.
///
/// # Errors
/// Returns `RunError` if configuration, Bluetooth or terminal setup fails.
async fn run(options: Options) -> Result<(), RunError> {
    let path = match options.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };
    info!("loading configuration file: {}", path.display());
    let aliases = config::load_or_bootstrap(&path)?.aliases();

    info!("using {} backend", options.backend);
    let mut source = scanner::open(options.backend);
    let mut terminal = TerminalDisplay::new()?;

    app::run_with_io(
        source.as_mut(),
        &mut terminal,
        &aliases,
        options.dwell,
        wait_for_interrupt(),
    )
    .await?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Set up panic hook to ensure clean exit codes and a usable terminal
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        let _ = display::restore_terminal();
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    let log_target = options.log_target(io::stderr().is_tty());
    if let Err(e) = init_logging(options.verbose, log_target) {
        eprintln!("error: cannot open log file: {e}");
        std::process::exit(EXIT_ERROR);
    }

    match run(options).await {
        Ok(()) => std::process::exit(EXIT_SUCCESS),
        Err(RunError::Config(ConfigError::Created(path))) => {
            eprintln!("Configuration file not found");
            eprintln!("Generated empty configuration file: {}", path.display());
            eprintln!("Add your devices to it and run again");
            std::process::exit(EXIT_ERROR);
        }
        Err(why) => {
            // Also covers a scanner that would not stop: exit without waiting on it.
            eprintln!("error: {}", why);
            std::process::exit(EXIT_ERROR);
        }
    }
}
