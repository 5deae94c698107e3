use std::io::Write;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use log::debug;

use crate::client::{TestMachineClient, DEFAULT_BASE_URL, DEFAULT_TIMEOUT_SECS};
use crate::config::{config_path, load_config, load_config_from, mask_secret, save_config_to, Config};
use crate::error::{Result, TestMachineError};
use crate::format::OutputMode;
use crate::handlers::{
    self, AnalysesAction, RepoAction, SnapshotAction, SnapshotRequest, ToolSelection, ToolsAction,
};

pub const TOKEN_ENV: &str = "TM_TOKEN_KEY";
pub const BASE_URL_ENV: &str = "TM_API_URL";

#[derive(Parser)]
#[command(
    name = "testmachine",
    version,
    about = "TestMachine AI's CLI. Analyze smart contracts."
)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Set result output type. Currently supported formats: json
    #[arg(short, long, global = true, value_name = "FORMAT")]
    pub output: Option<String>,

    /// The API token to use. This can be either a file path or a string
    #[arg(short, long, global = true, value_name = "TOKEN_OR_PATH")]
    pub token: Option<String>,

    /// HTTP request timeout in seconds
    #[arg(long, global = true, default_value_t = DEFAULT_TIMEOUT_SECS)]
    pub timeout: f64,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage repositories
    Repo(RepoArgs),
    /// Manage snapshots
    Snapshot(SnapshotArgs),
    /// Manage analyses
    Analyses(AnalysesArgs),
    /// Query available tools
    Tools(ToolsArgs),
    /// Manage testmachine stored config
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
pub struct RepoArgs {
    /// The action to perform. Must be in [list, create]
    pub action: String,

    /// The name of the repository to create
    #[arg(long)]
    pub name: Option<String>,
}

#[derive(Args)]
pub struct SnapshotArgs {
    /// The action to perform. Must be in [list, create, analyze, create-analyze]
    pub action: String,

    /// The ID of the repository to create this snapshot under - get this from `repo list`
    #[arg(long)]
    pub repo_id: Option<u64>,

    /// The ID of the snapshot - get this from `snapshot list`
    #[arg(long)]
    pub snapshot_id: Option<u64>,

    /// List of tools to run
    #[arg(long, num_args = 1.., value_delimiter = ',', conflicts_with = "all_tools")]
    pub tools: Option<Vec<String>>,

    /// Run every tool the backend offers
    #[arg(long)]
    pub all_tools: bool,

    /// The files or directories to upload for a new snapshot
    #[arg(long = "file", value_name = "PATH", num_args = 1..)]
    pub files: Vec<PathBuf>,

    /// The file defining remappings used to solve dependencies on contracts
    #[arg(long, value_name = "PATH")]
    pub remappings: Option<PathBuf>,
}

#[derive(Args)]
pub struct AnalysesArgs {
    /// The action to perform. Must be in [list, get, report]
    pub action: String,

    /// The ID of the snapshot - get this from `snapshot list`
    #[arg(long)]
    pub snapshot_id: Option<u64>,

    /// The ID of the analysis - get this from `analyses list`
    #[arg(long)]
    pub analysis_id: Option<u64>,
}

#[derive(Args)]
pub struct ToolsArgs {
    /// The action to perform. Must be in [list]
    pub action: String,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print config file path
    Path,
    /// Show stored config values
    Show,
    /// Set stored config values
    Set(ConfigSetArgs),
}

#[derive(Args)]
pub struct ConfigSetArgs {
    /// TestMachine API token, or a path to a file containing it
    #[arg(long)]
    pub api_token: Option<String>,

    /// TestMachine API base URL
    #[arg(long)]
    pub base_url: Option<String>,

    /// Tools to run when `snapshot analyze` is given no --tools
    #[arg(long, num_args = 1.., value_delimiter = ',')]
    pub default_tools: Option<Vec<String>>,

    /// Remove stored API token
    #[arg(long)]
    pub clear_api_token: bool,

    /// Remove stored base URL
    #[arg(long)]
    pub clear_base_url: bool,

    /// Remove stored default tools
    #[arg(long)]
    pub clear_default_tools: bool,
}

fn non_empty(s: &str) -> Option<&str> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then_some(trimmed)
}

fn resolve_from_env(env_var: &str) -> Option<String> {
    std::env::var(env_var)
        .ok()
        .as_deref()
        .and_then(non_empty)
        .map(str::to_owned)
}

/// Resolves the bearer token.
///
/// `TM_TOKEN_KEY` wins over `--token`, which wins over the stored config. A
/// set `TM_TOKEN_KEY` is taken verbatim, even when empty. A value naming an
/// existing regular file is replaced by the file's trimmed contents.
pub fn resolve_token(flag: Option<&str>, config: &Config) -> Result<String> {
    let value = std::env::var(TOKEN_ENV)
        .ok()
        .or_else(|| flag.and_then(non_empty).map(str::to_owned))
        .or_else(|| config.token.as_deref().and_then(non_empty).map(str::to_owned))
        .filter(|value| !value.is_empty())
        .ok_or(TestMachineError::MissingToken)?;

    let path = Path::new(&value);
    if path.is_file() {
        debug!("reading token from {}", path.display());
        let contents = std::fs::read_to_string(path)?;
        return non_empty(&contents)
            .map(str::to_owned)
            .ok_or(TestMachineError::MissingToken);
    }
    Ok(value)
}

pub fn resolve_base_url(config: &Config) -> String {
    resolve_from_env(BASE_URL_ENV)
        .or_else(|| config.base_url.as_deref().and_then(non_empty).map(str::to_owned))
        .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
}

fn tool_selection(args: &SnapshotArgs, config: &Config) -> ToolSelection {
    if let Some(tools) = args.tools.as_ref().filter(|t| !t.is_empty()) {
        return ToolSelection::Explicit(tools.clone());
    }
    if args.all_tools {
        return ToolSelection::All;
    }
    match &config.default_tools {
        Some(tools) => ToolSelection::Default(tools.clone()),
        None => ToolSelection::builtin(),
    }
}

fn build_client(token_flag: Option<&str>, timeout: f64, config: &Config) -> Result<TestMachineClient> {
    let token = resolve_token(token_flag, config)?;
    let base_url = resolve_base_url(config);
    debug!("using API at {base_url}");
    TestMachineClient::new(&base_url, &token, timeout)
}

/// Runs one parsed command, writing results to `out`.
pub fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    let mode = OutputMode::from_flag(cli.output.as_deref());
    let token = cli.token.as_deref();

    match cli.command {
        Commands::Config { action } => handle_config_with_path(action, &config_path(), out),
        Commands::Repo(args) => {
            let action: RepoAction = args.action.parse()?;
            let config = load_config();
            let client = build_client(token, cli.timeout, &config)?;
            handlers::repo(&client, mode, out, action, args.name.as_deref())
        }
        Commands::Snapshot(args) => {
            let action: SnapshotAction = args.action.parse()?;
            let config = load_config();
            let request = SnapshotRequest {
                repo_id: args.repo_id,
                snapshot_id: args.snapshot_id,
                files: args.files.clone(),
                remappings: args.remappings.clone(),
                tools: tool_selection(&args, &config),
            };
            let client = build_client(token, cli.timeout, &config)?;
            handlers::snapshot(&client, mode, out, action, &request)
        }
        Commands::Analyses(args) => {
            let action: AnalysesAction = args.action.parse()?;
            let config = load_config();
            let client = build_client(token, cli.timeout, &config)?;
            handlers::analyses(&client, mode, out, action, args.snapshot_id, args.analysis_id)
        }
        Commands::Tools(args) => {
            let action: ToolsAction = args.action.parse()?;
            let config = load_config();
            let client = build_client(token, cli.timeout, &config)?;
            handlers::tools(&client, mode, out, action)
        }
    }
}

fn update_field<T>(target: &mut Option<T>, value: Option<T>, clear: bool, label: &str) -> Result<bool> {
    if clear && value.is_some() {
        return Err(TestMachineError::ConflictingFlags(format!(
            "cannot use --{label} and --clear-{label} together"
        )));
    }
    if clear {
        *target = None;
        return Ok(true);
    }
    match value {
        None => Ok(false),
        Some(v) => {
            *target = Some(v);
            Ok(true)
        }
    }
}

pub fn handle_config_with_path(action: ConfigAction, path: &Path, out: &mut impl Write) -> Result<()> {
    match action {
        ConfigAction::Path => {
            writeln!(out, "{}", path.display())?;
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config_from(path);
            writeln!(out, "path: {}", path.display())?;
            let token_display = config
                .token
                .as_deref()
                .map(mask_secret)
                .unwrap_or_else(|| "(unset)".to_string());
            writeln!(out, "token: {token_display}")?;
            writeln!(
                out,
                "base_url: {}",
                config.base_url.as_deref().unwrap_or("(unset)")
            )?;
            let tools_display = config
                .default_tools
                .as_ref()
                .map(|tools| tools.join(","))
                .unwrap_or_else(|| "(unset)".to_string());
            writeln!(out, "default_tools: {tools_display}")?;
            Ok(())
        }
        ConfigAction::Set(args) => {
            let mut config = load_config_from(path);
            let mut updated = false;
            updated |= update_field(
                &mut config.token,
                args.api_token.as_deref().and_then(non_empty).map(str::to_owned),
                args.clear_api_token,
                "api-token",
            )?;
            updated |= update_field(
                &mut config.base_url,
                args.base_url.as_deref().and_then(non_empty).map(str::to_owned),
                args.clear_base_url,
                "base-url",
            )?;
            updated |= update_field(
                &mut config.default_tools,
                args.default_tools.filter(|tools| !tools.is_empty()),
                args.clear_default_tools,
                "default-tools",
            )?;
            if !updated {
                return Err(TestMachineError::NothingToUpdate);
            }
            save_config_to(path, &config)?;
            Ok(())
        }
    }
}
