use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use chrono::DateTime;
use chrono::SecondsFormat;
use chrono::Utc;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use serde::Serialize;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use nlx_core::add_or_update_preset;
use nlx_core::build_run_preset;
use nlx_core::dedupe_events;
use nlx_core::duplicate_preset;
use nlx_core::find_diagnose_line;
use nlx_core::fingerprint;
use nlx_core::load_run_presets_at;
use nlx_core::mark_preset_used;
use nlx_core::parse_diagnose_line;
use nlx_core::parse_preset_task_input;
use nlx_core::parse_url_state;
use nlx_core::remove_preset;
use nlx_core::store_run_presets_at;
use nlx_core::to_url_search;
use nlx_core::DiagnoseFields;
use nlx_core::DiagnoseHealth;
use nlx_core::DiagnosticEvent;
use nlx_core::EngineConfig;
use nlx_core::EnvelopeBuilder;
use nlx_core::FileStore;
use nlx_core::PresetDraft;
use nlx_core::RunConfig;
use nlx_core::RunEnvelope;
use nlx_core::RunInput;
use nlx_core::RunOutcome;
use nlx_core::UrlStateView;

#[derive(Debug, Parser)]
#[command(name = "nlx-dash", version, about = "NextLevelApex dashboard engine tools")]
struct Cli {
    /// Engine config file (defaults to <config dir>/nlx/dashboard.toml).
    #[arg(long, global = true, env = "NLX_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Parse a DNS diagnose line (argument or stdin) and report its health.
    Diagnose { line: Option<String> },
    /// Build a redacted run envelope from captured command output.
    Envelope(EnvelopeArgs),
    /// Check whether a JSON file holds a well-formed run envelope.
    ValidateEnvelope { file: PathBuf },
    /// Print the stable fingerprint of a diagnostic event.
    Fingerprint(FingerprintArgs),
    /// Dedupe a JSON array of diagnostic events (file or stdin).
    Dedupe { file: Option<PathBuf> },
    /// Manage saved run presets.
    Presets {
        /// Directory backing the preset store (defaults to <data dir>/nlx).
        #[arg(long)]
        store: Option<PathBuf>,
        #[command(subcommand)]
        action: PresetCommand,
    },
    /// Convert between dashboard query strings and view state.
    Url {
        #[command(subcommand)]
        action: UrlCommand,
    },
}

#[derive(Debug, Args)]
struct EnvelopeArgs {
    #[arg(long)]
    command_id: String,
    #[arg(long)]
    started_at: DateTime<Utc>,
    #[arg(long, default_value_t = 0)]
    exit_code: i32,
    #[arg(long, conflicts_with_all = ["spawn_error", "exit_code"])]
    timed_out: bool,
    #[arg(long, conflicts_with = "exit_code")]
    spawn_error: Option<String>,
    #[arg(long)]
    stdout_file: Option<PathBuf>,
    #[arg(long)]
    stderr_file: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct FingerprintArgs {
    #[arg(long)]
    severity: String,
    #[arg(long)]
    label: String,
    #[arg(long)]
    message: String,
    #[arg(long, default_value = "")]
    reason_code: String,
}

#[derive(Debug, Subcommand)]
enum PresetCommand {
    List,
    Add {
        name: String,
        #[arg(long)]
        command_id: String,
        /// Comma separated task names.
        #[arg(long, default_value = "")]
        tasks: String,
        #[arg(long)]
        dry_run: bool,
        /// `name=true|false`, repeatable.
        #[arg(long = "toggle")]
        toggles: Vec<String>,
    },
    Duplicate { id: String },
    Use { id: String },
    Remove { id: String },
}

#[derive(Debug, Subcommand)]
enum UrlCommand {
    /// Print the view state of a `?view=...` search string as JSON.
    Parse { search: String },
    /// Print the canonical search string for a JSON view state.
    Serialize { json: String },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DiagnoseReport<'a> {
    #[serde(flatten)]
    fields: &'a DiagnoseFields,
    health: DiagnoseHealth,
    exit_code: i32,
    note_tags: Vec<&'a str>,
}

fn main() -> ExitCode {
    init_tracing();
    match run(Cli::parse()) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .with_env_var("NLX_LOG")
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .with_target(false)
        .compact()
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Diagnose { line } => {
            let raw = match line {
                Some(line) => line,
                None => read_stdin()?,
            };
            let line = find_diagnose_line(&raw).unwrap_or(raw.trim());
            let fields = parse_diagnose_line(line)?;
            let health = fields.health();
            print_json(&DiagnoseReport {
                fields: &fields,
                health,
                exit_code: health.exit_code(),
                note_tags: fields.note_tags(),
            })?;
            Ok(ExitCode::from(exit_byte(health.exit_code())))
        }
        Command::Envelope(args) => {
            let builder = EnvelopeBuilder::from_config(&config)?;
            let envelope = builder.build(envelope_input(args)?);
            print_json(&envelope)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::ValidateEnvelope { file } => {
            let raw = read_file(&file)?;
            let valid = serde_json::from_str(&raw)
                .ok()
                .and_then(|value| RunEnvelope::from_untrusted(&value))
                .is_some();
            println!("{}", if valid { "valid" } else { "invalid" });
            Ok(if valid { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }
        Command::Fingerprint(args) => {
            let event = DiagnosticEvent {
                severity: args.severity,
                label: args.label,
                message: args.message,
                reason_code: args.reason_code,
            };
            println!("{}", fingerprint(&event));
            Ok(ExitCode::SUCCESS)
        }
        Command::Dedupe { file } => {
            let raw = match file {
                Some(path) => read_file(&path)?,
                None => read_stdin()?,
            };
            let events: Vec<DiagnosticEvent> =
                serde_json::from_str(&raw).context("events must be a JSON array")?;
            print_json(&dedupe_events(events))?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Presets { store, action } => {
            run_presets(&config, store, action)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Url { action } => {
            match action {
                UrlCommand::Parse { search } => print_json(&parse_url_state(&search))?,
                UrlCommand::Serialize { json } => {
                    let state: UrlStateView =
                        serde_json::from_str(&json).context("invalid view state JSON")?;
                    println!("{}", to_url_search(&state));
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_presets(config: &EngineConfig, store: Option<PathBuf>, action: PresetCommand) -> Result<()> {
    let root = match store {
        Some(root) => root,
        None => dirs::data_dir()
            .map(|dir| dir.join("nlx"))
            .ok_or_else(|| anyhow!("no data directory; pass --store"))?,
    };
    let mut storage = FileStore::open(&root)
        .with_context(|| format!("failed to open preset store {}", root.display()))?;
    let key = config.presets.storage_key.as_str();
    let mut presets = load_run_presets_at(&storage, key);
    let now = now_iso();

    match action {
        PresetCommand::List => {
            print_json(&presets)?;
            return Ok(());
        }
        PresetCommand::Add {
            name,
            command_id,
            tasks,
            dry_run,
            toggles,
        } => {
            let draft = PresetDraft {
                name,
                config: RunConfig {
                    command_id,
                    task_names: parse_preset_task_input(&tasks),
                    dry_run,
                    toggles: parse_toggles(&toggles)?,
                },
            };
            let preset = build_run_preset(draft, &now);
            print_json(&preset)?;
            add_or_update_preset(&mut presets, preset);
        }
        PresetCommand::Duplicate { id } => {
            let copy = duplicate_preset(&mut presets, &id, &now)
                .ok_or_else(|| anyhow!("no preset with id {id}"))?;
            print_json(&copy)?;
        }
        PresetCommand::Use { id } => {
            if !mark_preset_used(&mut presets, &id, &now) {
                bail!("no preset with id {id}");
            }
            if let Some(preset) = presets.iter().find(|preset| preset.id == id) {
                print_json(&preset.config)?;
            }
        }
        PresetCommand::Remove { id } => {
            if !remove_preset(&mut presets, &id) {
                bail!("no preset with id {id}");
            }
        }
    }

    store_run_presets_at(&mut storage, key, &presets)?;
    Ok(())
}

fn envelope_input(args: EnvelopeArgs) -> Result<RunInput> {
    let outcome = if let Some(message) = args.spawn_error {
        RunOutcome::SpawnFailed(message)
    } else if args.timed_out {
        RunOutcome::TimedOut
    } else {
        RunOutcome::Exited(args.exit_code)
    };
    let stdout = match args.stdout_file {
        Some(path) => read_file(&path)?,
        None => String::new(),
    };
    let stderr = match args.stderr_file {
        Some(path) => read_file(&path)?,
        None => String::new(),
    };
    Ok(RunInput {
        command_id: args.command_id,
        started_at: args.started_at,
        outcome,
        stdout,
        stderr,
        events: Vec::new(),
    })
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match dirs::config_dir() {
            Some(dir) => dir.join("nlx").join("dashboard.toml"),
            None => return Ok(EngineConfig::default()),
        },
    };
    tracing::debug!(path = %path.display(), "loading engine config");
    EngineConfig::load(&path).with_context(|| format!("failed to load config {}", path.display()))
}

fn parse_toggles(raw: &[String]) -> Result<BTreeMap<String, bool>> {
    raw.iter()
        .map(|pair| {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("toggle {pair:?} must be name=true|false"))?;
            let value = value
                .trim()
                .parse::<bool>()
                .with_context(|| format!("toggle {pair:?} must be name=true|false"))?;
            Ok((name.trim().to_string(), value))
        })
        .collect()
}

fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn exit_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(u8::MAX)
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn read_stdin() -> Result<String> {
    let mut raw = String::new();
    io::stdin()
        .read_to_string(&mut raw)
        .context("failed to read stdin")?;
    Ok(raw)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
