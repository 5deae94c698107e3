//! Resource handlers. Each one validates its arguments, performs its HTTP
//! call(s) behind a spinner and hands the result to the formatter.

use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressFinish, ProgressStyle};
use log::info;
use serde::Serialize;
use serde_json::json;

use crate::archive::{build_upload, plan_attachments};
use crate::client::TestMachineClient;
use crate::error::{Result, TestMachineError};
use crate::format::{count, emit, optional, OutputMode, Table};
use crate::models::{AnalysisRequest, Payload, ToolCatalog};

pub const DEFAULT_TOOLS: &[&str] = &["static", "symbolic"];

macro_rules! actions {
    ($name:ident { $($variant:ident => $keyword:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALLOWED: &'static [&'static str] = &[$($keyword),+];
        }

        impl FromStr for $name {
            type Err = TestMachineError;

            fn from_str(action: &str) -> Result<Self> {
                match action {
                    $($keyword => Ok(Self::$variant),)+
                    _ => Err(TestMachineError::InvalidAction {
                        action: action.to_string(),
                        allowed: Self::ALLOWED,
                    }),
                }
            }
        }
    };
}

actions!(RepoAction { List => "list", Create => "create" });
actions!(SnapshotAction {
    List => "list",
    Create => "create",
    Analyze => "analyze",
    CreateAnalyze => "create-analyze",
});
actions!(AnalysesAction { List => "list", Get => "get", Report => "report" });
actions!(ToolsAction { List => "list" });

/// Which tools an analyze request should run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSelection {
    /// Names given on the command line.
    Explicit(Vec<String>),
    /// Every tool in the backend catalog.
    All,
    /// Configured or built-in defaults.
    Default(Vec<String>),
}

impl ToolSelection {
    pub fn builtin() -> Self {
        Self::Default(DEFAULT_TOOLS.iter().map(|t| t.to_string()).collect())
    }

    /// Resolves the selection against the catalog. Any unknown name rejects
    /// the whole request.
    pub fn resolve(&self, catalog: &ToolCatalog) -> Result<Vec<String>> {
        let requested = match self {
            Self::All => return Ok(catalog.tools.clone()),
            Self::Explicit(tools) | Self::Default(tools) => tools,
        };
        let invalid: Vec<String> = requested
            .iter()
            .filter(|tool| !catalog.contains(tool))
            .cloned()
            .collect();
        if !invalid.is_empty() {
            return Err(TestMachineError::InvalidTool(invalid));
        }
        Ok(requested.clone())
    }
}

#[derive(Debug, Clone)]
pub struct SnapshotRequest {
    pub repo_id: Option<u64>,
    pub snapshot_id: Option<u64>,
    pub files: Vec<PathBuf>,
    pub remappings: Option<PathBuf>,
    pub tools: ToolSelection,
}

/// JSON shape printed after a repository or snapshot is created.
#[derive(Serialize)]
struct CreatedRow<'a> {
    #[serde(rename = "ID")]
    id: i64,
    #[serde(rename = "Name", skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

impl CreatedRow<'_> {
    fn table(&self) -> Table {
        Table::new(&["ID", "Name"]).row(vec![self.id.to_string(), optional(self.name)])
    }
}

fn spinner(message: &str) -> ProgressBar {
    if !std::io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner().with_finish(ProgressFinish::AndClear);
    if let Ok(style) = ProgressStyle::with_template("{spinner:.blue} {msg:.blue}") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn require<T>(value: Option<T>, flag: &'static str) -> Result<T> {
    value.ok_or(TestMachineError::MissingArgument(flag))
}

pub fn repo(
    client: &TestMachineClient,
    mode: OutputMode,
    out: &mut impl Write,
    action: RepoAction,
    name: Option<&str>,
) -> Result<()> {
    match action {
        RepoAction::List => {
            let repos = {
                let _spinner = spinner("Retrieving repositories...");
                client.list_repositories()?
            };
            emit(out, mode, "Repositories", &repos.raw, || {
                Table::new(&["ID", "Name", "Created at", "# snapshots", "# analyses"]).rows(
                    repos.data.iter().map(|repo| {
                        vec![
                            repo.id.to_string(),
                            repo.name.clone(),
                            optional(repo.created_at.as_deref()),
                            count(repo.count.snapshots),
                            count(repo.count.analyses),
                        ]
                    }),
                )
            })
        }
        RepoAction::Create => {
            let name = require(name.filter(|n| !n.trim().is_empty()), "--name")?;
            let created = {
                let _spinner = spinner("Creating repository...");
                client.create_repository(name)?
            };
            info!("created repository {}", created.data.id);
            let row = CreatedRow {
                id: created.data.id,
                name: created.data.name.as_deref(),
            };
            emit(out, mode, "Created repository", &row, || row.table())
        }
    }
}

pub fn snapshot(
    client: &TestMachineClient,
    mode: OutputMode,
    out: &mut impl Write,
    action: SnapshotAction,
    request: &SnapshotRequest,
) -> Result<()> {
    match action {
        SnapshotAction::List => {
            let repo_id = require(request.repo_id, "--repo-id")?;
            let snapshots = {
                let _spinner = spinner("Retrieving snapshots...");
                client.list_snapshots(repo_id)?
            };
            emit(out, mode, "Snapshots", &snapshots.raw, || {
                Table::new(&["ID", "Created at", "# files", "# analyses"]).rows(
                    snapshots.data.iter().map(|snapshot| {
                        vec![
                            snapshot.id.to_string(),
                            optional(snapshot.created_at.as_deref()),
                            count(snapshot.count.files),
                            count(snapshot.count.analyses),
                        ]
                    }),
                )
            })
        }
        SnapshotAction::Create => {
            let (id, name) = create_snapshot(client, request)?;
            let row = CreatedRow {
                id,
                name: name.as_deref(),
            };
            emit(out, mode, "Snapshot created", &row, || row.table())
        }
        SnapshotAction::Analyze => {
            let snapshot_id = require(request.snapshot_id, "--snapshot-id")?;
            let analysis = analyze_snapshot(client, snapshot_id, &request.tools)?;
            print_analysis_request(out, mode, &analysis)
        }
        SnapshotAction::CreateAnalyze => {
            let (id, _) = create_snapshot(client, request)?;
            // The uploaded snapshot stays on the backend if this step fails.
            let snapshot_id = u64::try_from(id).map_err(|_| {
                TestMachineError::MalformedResponse(format!("invalid snapshot id {id}"))
            })?;
            let analysis = analyze_snapshot(client, snapshot_id, &request.tools)?;
            print_analysis_request(out, mode, &analysis)
        }
    }
}

fn create_snapshot(client: &TestMachineClient, request: &SnapshotRequest) -> Result<(i64, Option<String>)> {
    let repo_id = require(request.repo_id, "--repo-id")?;
    let attachments = plan_attachments(&request.files, request.remappings.as_deref())?;

    let _spinner = spinner("Uploading file...");
    let upload = build_upload(&attachments)?;
    let created = client.create_snapshot(repo_id, upload.form)?;
    info!(
        "uploaded snapshot {} with {} attachment(s)",
        created.data.id,
        attachments.len()
    );
    Ok((created.data.id, created.data.name))
}

fn analyze_snapshot(
    client: &TestMachineClient,
    snapshot_id: u64,
    selection: &ToolSelection,
) -> Result<Payload<AnalysisRequest>> {
    let _spinner = spinner("Analyzing snapshot...");
    let catalog = client.tool_catalog()?;
    let tools = selection.resolve(&catalog.data)?;
    client.analyze_snapshot(snapshot_id, &tools)
}

fn print_analysis_request(
    out: &mut impl Write,
    mode: OutputMode,
    request: &Payload<AnalysisRequest>,
) -> Result<()> {
    emit(out, mode, "Analysis created", &request.raw, || {
        Table::new(&["Request ID", "Requested at", "Tool", "Error", "Status"]).rows(
            request.data.analyses.iter().map(|analysis| {
                vec![
                    request.data.id.to_string(),
                    optional(
                        analysis
                            .requested_at
                            .as_deref()
                            .or(request.data.requested_at.as_deref()),
                    ),
                    analysis.tool.name.clone(),
                    optional(analysis.error.as_deref()),
                    analysis.status.clone(),
                ]
            }),
        )
    })
}

pub fn analyses(
    client: &TestMachineClient,
    mode: OutputMode,
    out: &mut impl Write,
    action: AnalysesAction,
    snapshot_id: Option<u64>,
    analysis_id: Option<u64>,
) -> Result<()> {
    match action {
        AnalysesAction::List => {
            let snapshot_id = require(snapshot_id, "--snapshot-id")?;
            let analyses = {
                let _spinner = spinner("Retrieving analyses...");
                client.list_analyses(snapshot_id)?
            };
            emit(out, mode, "Analyses", &analyses.raw, || {
                Table::new(&[
                    "Request ID",
                    "Analysis ID",
                    "Tool",
                    "Status",
                    "Requested at",
                    "Completed",
                    "Target",
                ])
                .rows(analyses.data.iter().map(|analysis| {
                    vec![
                        analysis
                            .analysis_request_id
                            .map(|id| id.to_string())
                            .unwrap_or_default(),
                        analysis.id.to_string(),
                        analysis.tool.name.clone(),
                        analysis.status.clone(),
                        optional(analysis.requested_at.as_deref()),
                        if analysis.completed_at.is_some() { "Yes" } else { "No" }.to_string(),
                        optional(analysis.target.as_ref().map(|t| t.name.as_str())),
                    ]
                }))
            })
        }
        AnalysesAction::Get => {
            let analysis_id = require(analysis_id, "--analysis-id")?;
            let analysis = {
                let _spinner = spinner("Retrieving analysis...");
                client.get_analysis(analysis_id)?
            };
            let raw = &analysis.raw;
            let projected = json!({
                "analysisId": raw["id"],
                "tool": raw["tool"],
                "observations": raw["observations"],
                "error": raw["error"],
            });
            emit(out, mode, "Retrieved analysis", &projected, || {
                Table::new(&["Analysis ID", "Tool", "# observations", "Error"]).row(vec![
                    analysis.data.id.to_string(),
                    analysis.data.tool.name.clone(),
                    analysis.data.observations.len().to_string(),
                    optional(analysis.data.error.as_deref()),
                ])
            })?;
            if mode == OutputMode::Table {
                writeln!(
                    out,
                    "{}",
                    "(The raw analysis output can be seen by adding --output json to the command)"
                        .dimmed()
                )?;
            }
            Ok(())
        }
        AnalysesAction::Report => {
            let analysis_id = require(analysis_id, "--analysis-id")?;
            let report = {
                let _spinner = spinner("Retrieving analysis report...");
                client.get_report(analysis_id)?
            };
            if let Some(message) = report.data.error_message {
                return Err(TestMachineError::Report(message));
            }
            let url = report.data.download_url.ok_or_else(|| {
                TestMachineError::MalformedResponse(
                    "missing field `downloadURLOfGeneratedReport`".into(),
                )
            })?;
            match mode {
                OutputMode::Json => writeln!(out, "{}", serde_json::to_string(&report.raw)?)?,
                OutputMode::Table => {
                    writeln!(out, "\n{}", "Download URL of generated PDF report:".green())?;
                    writeln!(out, "{url}")?;
                }
            }
            Ok(())
        }
    }
}

pub fn tools(
    client: &TestMachineClient,
    mode: OutputMode,
    out: &mut impl Write,
    action: ToolsAction,
) -> Result<()> {
    match action {
        ToolsAction::List => {
            let catalog = {
                let _spinner = spinner("Retrieving tools...");
                client.tool_catalog()?
            };
            emit(out, mode, "Tools", &catalog.raw["tools"], || {
                Table::new(&["name"]).rows(catalog.data.tools.iter().map(|t| vec![t.clone()]))
            })
        }
    }
}
