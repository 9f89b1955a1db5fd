//! Harbormaster - GitOps reconciliation CLI
//!
//! Operator surface over a config directory of declarations and a
//! file-backed target environment:
//!
//! - `app`: list/show registered Application declarations
//! - `diff`: current delta set between desired and live state
//! - `sync`: run the orchestrator (supports `--dry-run` / `--force`)
//! - `history`: past sync results for an Application
//! - `rollback`: re-apply the revision of a recorded sync result
//! - `get`: sync/health status view
//!
//! Layout: `<config-dir>/{apps,projects}/*.json` plus pre-rendered
//! manifests under `<config-dir>/manifests/<path>/<revision>/`; live
//! objects and history live under `<state-dir>`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;

use harbormaster_cluster::{ClusterClient, DirRenderer, FsCluster, Renderer};
use harbormaster_core::diff::Delta;
use harbormaster_core::domain::{AppId, Application, Project, SyncOutcome, SyncResult};
use harbormaster_core::{init_tracing, Controller, ControllerConfig, ReconcileSpan, SyncOptions};

#[derive(Parser)]
#[command(name = "harbormaster")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "GitOps continuous reconciliation", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Directory holding apps/, projects/ and manifests/
    #[arg(long, global = true, default_value = ".", env = "HARBORMASTER_CONFIG_DIR")]
    config_dir: PathBuf,

    /// Directory holding live objects and sync history
    #[arg(long, global = true, default_value = ".harbormaster", env = "HARBORMASTER_STATE_DIR")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect Application declarations
    App {
        #[command(subcommand)]
        action: AppAction,
    },

    /// Show the current delta set for an Application
    Diff {
        /// Application name
        app: String,
    },

    /// Run a sync for an Application
    Sync {
        /// Application name
        app: String,

        /// Compute the full plan, apply nothing
        #[arg(long)]
        dry_run: bool,

        /// Delete-and-recreate on immutable-field conflicts
        #[arg(long)]
        force: bool,
    },

    /// Show past sync results for an Application
    History {
        /// Application name
        app: String,
    },

    /// Re-apply the revision recorded in a past sync result
    Rollback {
        /// Application name
        app: String,

        /// Sync result id (from `history`)
        result_id: String,
    },

    /// Show sync and health status for an Application
    Get {
        /// Application name
        app: String,
    },
}

#[derive(Subcommand)]
enum AppAction {
    /// List registered Applications
    List,

    /// Show one Application declaration
    Get {
        /// Application name
        name: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let workspace = Workspace::load(&cli.config_dir, &cli.state_dir)
        .await
        .context("failed to load harbormaster workspace")?;

    let code = match cli.command {
        Commands::App { action } => match action {
            AppAction::List => cmd_app_list(&workspace),
            AppAction::Get { name } => cmd_app_get(&workspace, &name),
        }?,
        Commands::Diff { app } => cmd_diff(&workspace, &app).await?,
        Commands::Sync { app, dry_run, force } => {
            cmd_sync(&workspace, &app, SyncOptions { dry_run, force }).await?
        }
        Commands::History { app } => cmd_history(&workspace, &app).await?,
        Commands::Rollback { app, result_id } => cmd_rollback(&workspace, &app, &result_id).await?,
        Commands::Get { app } => cmd_get(&workspace, &app).await?,
    };

    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Workspace loading
// ---------------------------------------------------------------------------

struct Workspace {
    controller: Arc<Controller>,
    apps: Vec<Application>,
    state_dir: PathBuf,
}

impl Workspace {
    async fn load(config_dir: &Path, state_dir: &Path) -> Result<Self> {
        let renderer: Arc<dyn Renderer> = Arc::new(DirRenderer::new(config_dir.join("manifests")));
        let cluster: Arc<dyn ClusterClient> = Arc::new(
            FsCluster::new(state_dir.join("cluster")).context("failed to open cluster state")?,
        );
        let controller = Arc::new(Controller::new(renderer, cluster, ControllerConfig::default()));

        for project in read_json_dir::<Project>(&config_dir.join("projects"))? {
            controller.upsert_project(project).await;
        }

        let apps = read_json_dir::<Application>(&config_dir.join("apps"))?;
        for app in &apps {
            let history = load_history(state_dir, &app.name)?;
            controller
                .register_app_with_history(app.clone(), history)
                .await;
        }

        Ok(Self {
            controller,
            apps,
            state_dir: state_dir.to_path_buf(),
        })
    }

    fn require_app(&self, name: &str) -> Result<AppId> {
        self.apps
            .iter()
            .find(|a| a.name == name)
            .map(Application::id)
            .with_context(|| format!("no application named '{}' in config directory", name))
    }

    async fn persist_history(&self, id: &AppId) -> Result<()> {
        let entries = self.controller.history(id).await?;
        save_history(&self.state_dir, id.as_str(), &entries)
    }
}

/// Read every `*.json` file in `dir` as a `T`. A missing directory is
/// an empty set.
fn read_json_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .collect::<std::io::Result<Vec<_>>>()?
        .into_iter()
        .map(|e| e.path())
        .filter(|p| p.extension().map(|e| e == "json") == Some(true))
        .collect();
    paths.sort();

    let mut items = Vec::new();
    for path in paths {
        let bytes = fs::read(&path)?;
        items.push(
            serde_json::from_slice(&bytes)
                .with_context(|| format!("failed to parse {}", path.display()))?,
        );
    }
    Ok(items)
}

fn history_path(state_dir: &Path, app: &str) -> PathBuf {
    state_dir.join("history").join(format!("{}.json", app))
}

/// Persisted oldest-first so re-appending preserves order.
fn load_history(state_dir: &Path, app: &str) -> Result<Vec<SyncResult>> {
    let path = history_path(state_dir, app);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = fs::read(&path)?;
    serde_json::from_slice(&bytes).with_context(|| format!("failed to parse {}", path.display()))
}

fn save_history(state_dir: &Path, app: &str, newest_first: &[SyncResult]) -> Result<()> {
    let path = history_path(state_dir, app);
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    let oldest_first: Vec<&SyncResult> = newest_first.iter().rev().collect();
    fs::write(&path, serde_json::to_vec_pretty(&oldest_first)?)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_app_list(workspace: &Workspace) -> Result<i32> {
    if workspace.apps.is_empty() {
        println!("No applications found in config directory.");
        return Ok(0);
    }
    println!(
        "{:<20} {:<12} {:<14} {:<10} {:<6}",
        "NAME", "PROJECT", "REVISION", "AUTOMATED", "PRUNE"
    );
    for app in &workspace.apps {
        println!(
            "{:<20} {:<12} {:<14} {:<10} {:<6}",
            app.name,
            app.project,
            app.source.revision,
            app.sync_policy.automated,
            app.sync_policy.prune,
        );
    }
    Ok(0)
}

fn cmd_app_get(workspace: &Workspace, name: &str) -> Result<i32> {
    let app = workspace
        .apps
        .iter()
        .find(|a| a.name == name)
        .with_context(|| format!("no application named '{}'", name))?;
    println!("{}", serde_json::to_string_pretty(app)?);
    Ok(0)
}

async fn cmd_diff(workspace: &Workspace, name: &str) -> Result<i32> {
    let id = workspace.require_app(name)?;
    let deltas = workspace.controller.diff_app(&id).await?;

    let mut drifted = 0usize;
    for delta in &deltas {
        match delta {
            Delta::Missing { desired } => {
                drifted += 1;
                println!("missing   {}", desired.key);
            }
            Delta::Extra { live } => {
                drifted += 1;
                println!("extra     {}", live.key);
            }
            Delta::Modified { desired, .. } => {
                drifted += 1;
                println!("modified  {}", desired.key);
            }
            Delta::Unchanged { key } => println!("unchanged {}", key),
        }
    }

    if drifted == 0 {
        println!("In sync: {} objects match the desired state.", deltas.len());
        Ok(0)
    } else {
        println!("Out of sync: {} of {} objects drifted.", drifted, deltas.len());
        Ok(1)
    }
}

async fn cmd_sync(workspace: &Workspace, name: &str, options: SyncOptions) -> Result<i32> {
    let id = workspace.require_app(name)?;
    let _span = ReconcileSpan::enter(name);

    let result = workspace.controller.sync(&id, options).await?;
    if !options.dry_run {
        workspace.persist_history(&id).await?;
    }
    print_result(&result);
    Ok(exit_code(&result.outcome))
}

async fn cmd_history(workspace: &Workspace, name: &str) -> Result<i32> {
    let id = workspace.require_app(name)?;
    let entries = workspace.controller.history(&id).await?;
    if entries.is_empty() {
        println!("No sync history for '{}'.", name);
        return Ok(0);
    }

    println!("{:<38} {:<14} {:<10} {:<8}", "ID", "REVISION", "OUTCOME", "OBJECTS");
    for entry in entries {
        println!(
            "{:<38} {:<14} {:<10} {:<8}",
            entry.id,
            entry.revision,
            outcome_label(&entry.outcome),
            entry.objects.len(),
        );
    }
    Ok(0)
}

async fn cmd_rollback(workspace: &Workspace, name: &str, result_id: &str) -> Result<i32> {
    let id = workspace.require_app(name)?;
    let result_id = result_id
        .parse::<uuid::Uuid>()
        .context("result id must be a UUID from `history`")?;
    let _span = ReconcileSpan::enter(name);

    let result = workspace.controller.rollback(&id, result_id).await?;
    workspace.persist_history(&id).await?;
    println!("Rolled back to revision {}.", result.revision);
    print_result(&result);
    Ok(exit_code(&result.outcome))
}

async fn cmd_get(workspace: &Workspace, name: &str) -> Result<i32> {
    let id = workspace.require_app(name)?;
    let status = workspace.controller.refresh_status(&id).await?;

    let sync_label = match status.sync_status {
        Some(harbormaster_core::domain::SyncStatus::Synced) => "synced",
        Some(harbormaster_core::domain::SyncStatus::OutOfSync) => "out_of_sync",
        None => "unknown",
    };
    println!("Sync status:   {}", sync_label);
    println!("Health status: {}", status.health_status);
    match &status.last_result {
        Some(last) => println!(
            "Last sync:     {} at {} ({})",
            last.revision,
            last.finished_at,
            outcome_label(&last.outcome),
        ),
        None => println!("Last sync:     never"),
    }
    for warning in &status.warnings {
        println!("Warning:       {}", warning);
    }
    Ok(0)
}

// ---------------------------------------------------------------------------
// Output helpers
// ---------------------------------------------------------------------------

fn print_result(result: &SyncResult) {
    for object in &result.objects {
        let action = match object.outcome {
            harbormaster_core::domain::ObjectOutcome::Created => "created",
            harbormaster_core::domain::ObjectOutcome::Updated => "updated",
            harbormaster_core::domain::ObjectOutcome::Deleted => "deleted",
            harbormaster_core::domain::ObjectOutcome::NoOp => "no-op",
            harbormaster_core::domain::ObjectOutcome::Failed => "FAILED",
        };
        match &object.message {
            Some(message) => println!("{:<8} {} ({})", action, object.key, message),
            None => println!("{:<8} {}", action, object.key),
        }
    }
    println!(
        "Sync {}: {} ({} objects, {} ms)",
        result.id,
        outcome_label(&result.outcome),
        result.objects.len(),
        result.duration_ms(),
    );
}

fn outcome_label(outcome: &SyncOutcome) -> String {
    match outcome {
        SyncOutcome::Succeeded => "succeeded".to_string(),
        SyncOutcome::Failed { reason } => format!("failed: {}", reason),
        SyncOutcome::Aborted => "aborted".to_string(),
        SyncOutcome::OutOfSyncNoAction { reason } => format!("no action: {}", reason),
    }
}

/// Exit codes for a sync invocation: 0 succeeded, 1 failed, 2 aborted,
/// 3 policy declined.
fn exit_code(outcome: &SyncOutcome) -> i32 {
    match outcome {
        SyncOutcome::Succeeded => 0,
        SyncOutcome::Failed { .. } => 1,
        SyncOutcome::Aborted => 2,
        SyncOutcome::OutOfSyncNoAction { .. } => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use harbormaster_core::domain::{ObjectOutcome, ObjectResult};

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&SyncOutcome::Succeeded), 0);
        assert_eq!(
            exit_code(&SyncOutcome::Failed {
                reason: "x".to_string()
            }),
            1
        );
        assert_eq!(exit_code(&SyncOutcome::Aborted), 2);
        assert_eq!(
            exit_code(&SyncOutcome::OutOfSyncNoAction {
                reason: "x".to_string()
            }),
            3
        );
    }

    #[test]
    fn test_history_round_trip_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let now = chrono::Utc::now();
        let mk = |revision: &str| SyncResult {
            id: uuid::Uuid::new_v4(),
            revision: revision.to_string(),
            manifest_digest: None,
            outcome: SyncOutcome::Succeeded,
            objects: vec![ObjectResult {
                key: harbormaster_cluster::ObjectKey::new("ConfigMap", "ns", "a"),
                outcome: ObjectOutcome::Created,
                hook: None,
                message: None,
            }],
            dry_run: false,
            started_at: now,
            finished_at: now,
        };

        // Newest first, as the controller reports it.
        let newest_first = vec![mk("r2"), mk("r1")];
        save_history(dir.path(), "shop", &newest_first).unwrap();

        // Loaded oldest first, ready for re-appending.
        let loaded = load_history(dir.path(), "shop").unwrap();
        let revisions: Vec<&str> = loaded.iter().map(|r| r.revision.as_str()).collect();
        assert_eq!(revisions, vec!["r1", "r2"]);
    }

    #[test]
    fn test_missing_history_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_history(dir.path(), "shop").unwrap().is_empty());
    }
}
