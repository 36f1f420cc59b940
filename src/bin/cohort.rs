//! Cohort CLI - Command-line interface for Synheart Cohort
//!
//! Commands:
//! - analyze: Run the analysis engine over a cohort and write the report
//! - validate: Check participant series against the input contract
//! - config: Print the effective engine configuration
//! - doctor: Diagnose environment and configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use synheart_cohort::types::MetricType;
use synheart_cohort::{AnalysisEngine, EngineConfig, EngineError, TimeSeriesStore};
use synheart_cohort::{ENGINE_VERSION, PRODUCER_NAME};

/// Cohort - Correlation, baseline and anomaly analysis for wearable cohorts
#[derive(Parser)]
#[command(name = "cohort")]
#[command(author = "Synheart AI Inc")]
#[command(version = ENGINE_VERSION)]
#[command(about = "Analyze cleaned wearable time series across a cohort", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full analysis and write the report
    Analyze {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        format: InputFormat,

        /// Engine configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Worker threads (overrides the configuration; 0 = one per core)
        #[arg(long)]
        workers: Option<usize>,

        /// Pretty-print the report
        #[arg(long)]
        pretty: bool,
    },

    /// Validate participant series without running the analysis
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        format: InputFormat,

        /// Output the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the effective configuration as TOML
    Config {
        /// Print the built-in defaults
        #[arg(long, conflicts_with = "config")]
        defaults: bool,

        /// Configuration file to validate and print
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Diagnose environment and configuration
    Doctor {
        /// Configuration file to check
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum InputFormat {
    /// Newline-delimited samples
    Ndjson,
    /// `{"participants": {...}}` document
    Json,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", serde_json::to_string(&CliError::from(e)).unwrap_or_else(|_| "Unknown error".to_string()));
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<(), CohortCliError> {
    match cli.command {
        Commands::Analyze {
            input,
            output,
            format,
            config,
            workers,
            pretty,
        } => cmd_analyze(&input, &output, format, config.as_deref(), workers, pretty),

        Commands::Validate { input, format, json } => cmd_validate(&input, format, json),

        Commands::Config { defaults, config } => cmd_config(defaults, config.as_deref()),

        Commands::Doctor { config, json } => cmd_doctor(config.as_deref(), json),
    }
}

fn cmd_analyze(
    input: &Path,
    output: &Path,
    format: InputFormat,
    config_path: Option<&Path>,
    workers: Option<usize>,
    pretty: bool,
) -> Result<(), CohortCliError> {
    let mut config = load_config(config_path)?;
    if let Some(workers) = workers {
        config.workers = workers;
    }

    let store = load_store(input, format)?;
    if store.is_empty() {
        return Err(CohortCliError::NoParticipants);
    }

    let report = AnalysisEngine::new(config)?.run(&store)?;
    let rendered = if pretty {
        report.to_json_pretty()?
    } else {
        report.to_json()?
    };

    if output.to_string_lossy() == "-" {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        writeln!(handle, "{}", rendered)?;
    } else {
        fs::write(output, rendered + "\n")?;
    }

    Ok(())
}

fn cmd_validate(input: &Path, format: InputFormat, json: bool) -> Result<(), CohortCliError> {
    let store = load_store(input, format)?;
    let errors = store.validate_all();

    let report = ValidationReport {
        total_participants: store.len(),
        valid_participants: store.len() - errors.len(),
        invalid_participants: errors.len(),
        sample_counts: store.sample_counts().into_iter().collect(),
        errors: errors
            .iter()
            .map(|e| ValidationErrorDetail {
                participant_id: match e {
                    EngineError::MisalignedInput { participant_id, .. } => Some(participant_id.clone()),
                    _ => None,
                },
                error: e.to_string(),
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Participants:      {}", report.total_participants);
        println!("Valid:             {}", report.valid_participants);
        println!("Invalid:           {}", report.invalid_participants);

        if !report.sample_counts.is_empty() {
            println!("\nSamples:");
            for (metric, count) in &report.sample_counts {
                println!("  {:<14} {}", metric.as_str(), count);
            }
        }

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Participant {}: {}",
                    err.participant_id.as_deref().unwrap_or("unknown"),
                    err.error
                );
            }
        }
    }

    if report.invalid_participants > 0 {
        Err(CohortCliError::ValidationFailed(report.invalid_participants))
    } else {
        Ok(())
    }
}

fn cmd_config(defaults: bool, config_path: Option<&Path>) -> Result<(), CohortCliError> {
    let config = if defaults {
        EngineConfig::default()
    } else {
        load_config(config_path)?
    };
    print!("{}", config.to_toml_string()?);
    Ok(())
}

fn cmd_doctor(config_path: Option<&Path>, json: bool) -> Result<(), CohortCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "engine_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Cohort engine version {}", ENGINE_VERSION),
    });

    let threads = rayon::current_num_threads();
    checks.push(DoctorCheck {
        name: "workers".to_string(),
        status: CheckStatus::Ok,
        message: format!("Default worker pool: {} threads", threads),
    });

    if let Some(path) = config_path {
        if path.exists() {
            match EngineConfig::from_file(path) {
                Ok(config) => checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Ok,
                    message: format!("Configuration valid ({} metric pairs)", config.pairs.len()),
                }),
                Err(e) => checks.push(DoctorCheck {
                    name: "config".to_string(),
                    status: CheckStatus::Error,
                    message: format!("Invalid configuration: {}", e),
                }),
            }
        } else {
            checks.push(DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Warning,
                message: "Configuration file does not exist".to_string(),
            });
        }
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (use --input <file>)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (--input - ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: ENGINE_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Cohort Doctor Report");
        println!("====================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");

        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(CohortCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, CohortCliError> {
    match path {
        Some(path) => Ok(EngineConfig::from_file(path)?),
        None => Ok(EngineConfig::default()),
    }
}

fn load_store(input: &Path, format: InputFormat) -> Result<TimeSeriesStore, CohortCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let store = match format {
        InputFormat::Ndjson => TimeSeriesStore::from_ndjson(&input_data)?,
        InputFormat::Json => TimeSeriesStore::from_json(&input_data)?,
    };
    Ok(store)
}

// Error types

#[derive(Debug)]
enum CohortCliError {
    Io(io::Error),
    Engine(EngineError),
    Json(serde_json::Error),
    NoParticipants,
    ValidationFailed(usize),
    DoctorFailed,
}

impl From<io::Error> for CohortCliError {
    fn from(e: io::Error) -> Self {
        CohortCliError::Io(e)
    }
}

impl From<EngineError> for CohortCliError {
    fn from(e: EngineError) -> Self {
        CohortCliError::Engine(e)
    }
}

impl From<serde_json::Error> for CohortCliError {
    fn from(e: serde_json::Error) -> Self {
        CohortCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<CohortCliError> for CliError {
    fn from(e: CohortCliError) -> Self {
        match e {
            CohortCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            CohortCliError::Engine(e) => {
                let (code, hint) = match &e {
                    EngineError::Configuration(_) | EngineError::TomlError(_) => {
                        ("CONFIG_ERROR", "Run 'cohort config --defaults' for a valid template")
                    }
                    EngineError::ReservedParticipantId(_) => {
                        ("RESERVED_ID", "Rename the participant; 'cohort' is reserved")
                    }
                    EngineError::DuplicateParticipant(_) => {
                        ("DUPLICATE_PARTICIPANT", "Each participant may appear once in a JSON document")
                    }
                    EngineError::MisalignedInput { .. } => {
                        ("MISALIGNED_INPUT", "Run 'cohort validate' for details")
                    }
                    EngineError::IoError(_) => ("IO_ERROR", "Check file paths and permissions"),
                    EngineError::ParseError(_) | EngineError::JsonError(_) => {
                        ("PARSE_ERROR", "Ensure input contains cleaned samples in the expected layout")
                    }
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            CohortCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            CohortCliError::NoParticipants => CliError {
                code: "NO_PARTICIPANTS".to_string(),
                message: "No participants found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            CohortCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} participants failed validation", count),
                hint: Some("Fix the reported series and retry".to_string()),
            },
            CohortCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct ValidationReport {
    total_participants: usize,
    valid_participants: usize,
    invalid_participants: usize,
    sample_counts: Vec<(MetricType, usize)>,
    errors: Vec<ValidationErrorDetail>,
}

#[derive(serde::Serialize)]
struct ValidationErrorDetail {
    participant_id: Option<String>,
    error: String,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
