use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use cmcs_license_sync::io::{COORDINATES_FILE, DatasetLayout, LICENSES_FILE};
use cmcs_license_sync::remote::{ClientConfig, Credentials, DEFAULT_BASE_URL, Session};
use cmcs_license_sync::sync::{
    self, CoordinateTargets, UpdateOptions, UpdateOutcome, UpdateSummary,
};
use cmcs_license_sync::{Result, ToolError};

const RULE_WIDTH: usize = 70;
const LISTED_FAILURES: usize = 5;

fn main() {
    let cli = Cli::parse();
    let pause = cli.pause;

    let code = match run(cli) {
        Ok(()) => 0,
        Err(error) => {
            report_error(&error);
            1
        }
    };

    if pause {
        wait_for_enter();
    }
    std::process::exit(code);
}

fn run(cli: Cli) -> Result<()> {
    init_tracing(cli.quiet, cli.verbose)?;
    print_banner("CMCS Valid License Updater");

    let layout = DatasetLayout::in_dir(&cli.data_dir);
    let config = ClientConfig {
        base_url: cli.base_url.clone(),
        timeout: Duration::from_secs(cli.timeout_secs),
    };
    let options = UpdateOptions {
        coordinate_targets: cli.coordinates.into(),
        show_progress: !cli.no_progress && !cli.quiet,
    };

    let outcome = sync::update_datasets(&layout, options, || {
        let credentials = cli.credentials()?;
        Session::authenticate(&config, &credentials)
    })?;

    match outcome {
        UpdateOutcome::UpToDate { total_licenses } => {
            print_banner("[i] INFO: No new licenses found");
            println!("The CMCS system has no new valid licenses since the last update.");
            println!("All {total_licenses} licenses are up to date. No changes were made to the files.");
        }
        UpdateOutcome::Updated(summary) => print_summary(&summary),
    }
    Ok(())
}

fn init_tracing(quiet: bool, verbose: bool) -> Result<()> {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env("CMCS_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|error| ToolError::Logging(error.to_string()))
}

fn print_banner(title: &str) {
    let rule = "=".repeat(RULE_WIDTH);
    println!("{rule}");
    println!("{title}");
    println!("{rule}");
    println!();
}

fn print_summary(summary: &UpdateSummary) {
    if !summary.failures.is_empty() {
        println!(
            "[!] WARNING: Failed to retrieve coordinates for {} licenses:",
            summary.failures.len()
        );
        for failure in summary.failures.iter().take(LISTED_FAILURES) {
            println!("   - License ID {}: {}", failure.license_id, failure.reason);
        }
        if summary.failures.len() > LISTED_FAILURES {
            println!("   ... and {} more", summary.failures.len() - LISTED_FAILURES);
        }
        println!();
    }

    print_banner("[OK] UPDATE COMPLETED SUCCESSFULLY");
    println!("Summary:");
    println!("  - Total licenses in system: {}", summary.total_licenses);
    println!("  - New licenses added: {}", summary.added_licenses);
    println!("  - Licenses no longer valid: {}", summary.retired_licenses);
    println!("  - Coordinate points added: {}", summary.points_added);
    println!();
    println!("Output files:");
    println!("  - {LICENSES_FILE}");
    println!("  - {COORDINATES_FILE}");
}

fn report_error(error: &ToolError) {
    eprintln!();
    eprintln!("[X] ERROR ({}): {error}", error.kind());
    eprintln!();
    eprintln!("{}", error.hint());
}

fn wait_for_enter() {
    print!("\nPress Enter to exit...");
    let _ = io::stdout().flush();
    let mut line = String::new();
    let _ = io::stdin().lock().read_line(&mut line);
}

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Update the CMCS valid licence workbooks from the licensing portal."
)]
struct Cli {
    /// Folder holding the licence and coordinate workbooks.
    #[arg(long, default_value = ".")]
    data_dir: PathBuf,

    /// Root URL of the CMCS portal.
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Portal user name.
    #[arg(long, env = "CMCS_USERNAME")]
    username: Option<String>,

    /// Portal password.
    #[arg(long, env = "CMCS_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Timeout in seconds for every portal request.
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Which licences get their coordinates downloaded.
    #[arg(long, value_enum, default_value_t = CoordinateMode::NewLicenses)]
    coordinates: CoordinateMode,

    /// Only print warnings and errors.
    #[arg(long, conflicts_with = "verbose")]
    quiet: bool,

    /// Print debug logging.
    #[arg(long)]
    verbose: bool,

    /// Hide progress bars.
    #[arg(long)]
    no_progress: bool,

    /// Wait for Enter before exiting.
    #[arg(long)]
    pause: bool,
}

impl Cli {
    fn credentials(&self) -> Result<Credentials> {
        match (&self.username, &self.password) {
            (Some(username), Some(password)) if !username.is_empty() => Ok(Credentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => Err(ToolError::MissingCredentials),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum CoordinateMode {
    NewLicenses,
    MissingCoordinates,
}

impl From<CoordinateMode> for CoordinateTargets {
    fn from(mode: CoordinateMode) -> Self {
        match mode {
            CoordinateMode::NewLicenses => CoordinateTargets::NewLicenses,
            CoordinateMode::MissingCoordinates => CoordinateTargets::MissingCoordinates,
        }
    }
}
