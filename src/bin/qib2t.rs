use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use qib_transmart::app::{self, ExportOptions, ExportOutcome};
use qib_transmart::config::{ConfigLoader, ConfigSources};
use qib_transmart::error::QibError;
use qib_transmart::output::{ConsoleProgress, JsonOutput, OutputMode, print_summary};

#[derive(Parser)]
#[command(name = "qib2t")]
#[command(about = "Convert XNAT QIB datatypes into a tranSMART upload directory")]
#[command(version, author)]
struct Cli {
    /// Configuration file containing the connection, study and tags sections.
    #[arg(long)]
    all: Option<PathBuf>,

    /// Configuration file with the XNAT connection section.
    #[arg(long)]
    connection: Option<PathBuf>,

    /// Configuration file with the study section.
    #[arg(long)]
    params: Option<PathBuf>,

    /// Configuration file with the tags section.
    #[arg(long)]
    tags: Option<PathBuf>,

    /// Ledger file (default: QIBSubjects.log in the study directory).
    #[arg(long)]
    ledger: Option<Utf8PathBuf>,

    /// Print a JSON summary instead of progress lines.
    #[arg(long)]
    non_interactive: bool,
}

fn main() -> ExitCode {
    match run() {
        Ok(outcome) => ExitCode::from(outcome_exit_code(&outcome)),
        Err(report) => {
            eprintln!("{report:?}");
            if let Some(qib) = report.downcast_ref::<QibError>() {
                return ExitCode::from(map_exit_code(qib));
            }
            ExitCode::from(1)
        }
    }
}

/// A run that finds no QIB data only warns.
fn outcome_exit_code(outcome: &ExportOutcome) -> u8 {
    match outcome {
        ExportOutcome::Written(_) | ExportOutcome::NoDataFound { .. } => 0,
    }
}

fn map_exit_code(error: &QibError) -> u8 {
    match error {
        QibError::NoConfiguration
        | QibError::ConfigRead(_)
        | QibError::ConfigParse(_)
        | QibError::ConfigurationMissing { .. } => 2,
        QibError::ConnectionFailure(_) | QibError::XnatHttp(_) => 3,
        QibError::ProjectNotFound(_) => 4,
        _ => 1,
    }
}

fn run() -> miette::Result<ExportOutcome> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let sources = ConfigSources {
        all: cli.all,
        connection: cli.connection,
        params: cli.params,
        tags: cli.tags,
    };
    let config = ConfigLoader::resolve(&sources)?;
    let options = ExportOptions {
        ledger_path: cli.ledger,
    };

    match output_mode {
        OutputMode::NonInteractive => {
            let outcome = app::run(&config, &options, &JsonOutput)?;
            JsonOutput::print_outcome(&outcome).into_diagnostic()?;
            Ok(outcome)
        }
        OutputMode::Interactive => {
            let outcome = app::run(&config, &options, &ConsoleProgress)?;
            print_summary(&outcome);
            Ok(outcome)
        }
    }
}
