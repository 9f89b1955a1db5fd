//! Harbormaster daemon: one continuous policy loop per declared
//! Application, against a file-backed target environment.
//!
//! Loads `apps/*.json` and `projects/*.json` from the config directory,
//! spawns the controller loops, and runs until interrupted.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};

use harbormaster_cluster::{ClusterClient, DirRenderer, FsCluster, Renderer};
use harbormaster_core::domain::{Application, Project};
use harbormaster_core::{init_tracing, Controller, ControllerConfig};

#[derive(Parser)]
#[command(name = "harbormasterd")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Harbormaster reconciliation daemon", long_about = None)]
struct Args {
    /// Directory holding apps/, projects/ and manifests/
    #[arg(long, default_value = ".", env = "HARBORMASTER_CONFIG_DIR")]
    config_dir: PathBuf,

    /// Directory holding live objects
    #[arg(long, default_value = ".harbormaster", env = "HARBORMASTER_STATE_DIR")]
    state_dir: PathBuf,

    /// Seconds between Observing cycles per Application
    #[arg(long, default_value_t = 180)]
    poll_interval_secs: u64,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(args.json, level);

    let renderer: Arc<dyn Renderer> = Arc::new(DirRenderer::new(args.config_dir.join("manifests")));
    let cluster: Arc<dyn ClusterClient> = Arc::new(
        FsCluster::new(args.state_dir.join("cluster")).context("failed to open cluster state")?,
    );
    let controller = Arc::new(Controller::new(
        renderer,
        cluster,
        ControllerConfig {
            poll_interval: Duration::from_secs(args.poll_interval_secs),
            ..ControllerConfig::default()
        },
    ));

    for project in read_json_dir::<Project>(&args.config_dir.join("projects"))? {
        info!(project = %project.name, "loaded project");
        controller.upsert_project(project).await;
    }

    let apps = read_json_dir::<Application>(&args.config_dir.join("apps"))?;
    anyhow::ensure!(!apps.is_empty(), "no applications found in config directory");

    let mut handles = Vec::new();
    for app in apps {
        let id = app.id();
        info!(app = %id, revision = %app.source.revision, "registering application");
        controller.register_app(app).await;
        handles.push(Arc::clone(&controller).spawn_loop(id.clone()));
        // First cycle immediately instead of waiting out the poll timer.
        controller.notify(&id).await?;
    }

    info!(apps = handles.len(), "harbormasterd started");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    for id in controller.app_ids().await {
        controller.remove_app(&id, false).await.ok();
    }
    for handle in handles {
        handle.await.ok();
    }
    Ok(())
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
