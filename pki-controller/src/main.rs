//! pki-controller — converges the mTLS PKI of a kVDI cluster
//!
//! One-shot controller that:
//! - Ensures the cluster root CA exists and is readable
//! - Ensures the app server and client certificates verify against it
//! - Issues certificates for the listed desktop sessions, concurrently

mod config;
mod logger;
mod runner;

use anyhow::Context;
use config::Config;
use kvdi_pki::{FileStore, PkiManager, Session, VdiCluster};
use runner::Runner;
use serde::Deserialize;
use std::sync::Arc;

/// An entry of the sessions file.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionEntry {
    session: Session,
    service_ip: String,
}

fn load_cluster(config: &Config) -> anyhow::Result<VdiCluster> {
    match &config.cluster_file {
        Some(path) => {
            let data = std::fs::read(path).with_context(|| format!("reading {path}"))?;
            serde_json::from_slice(&data).with_context(|| format!("parsing {path}"))
        }
        None => {
            let cluster = VdiCluster::new(config.cluster_name.as_str());
            Ok(match &config.app_namespace {
                Some(ns) => cluster.with_app_namespace(ns.as_str()),
                None => cluster,
            })
        }
    }
}

fn load_sessions(config: &Config) -> anyhow::Result<Vec<SessionEntry>> {
    match &config.sessions_file {
        Some(path) => {
            let data = std::fs::read(path).with_context(|| format!("reading {path}"))?;
            serde_json::from_slice(&data).with_context(|| format!("parsing {path}"))
        }
        None => Ok(Vec::new()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    let _ = dotenvy::dotenv();

    let config = Config::from_env();
    logger::init_logger(&config.log_level, config.log_json, config.log_dir.as_deref())?;

    let cluster = load_cluster(&config)?;
    let sessions = load_sessions(&config)?;

    tracing::info!(
        cluster = cluster.name(),
        namespace = cluster.core_namespace(),
        work_dir = %config.work_dir,
        sessions = sessions.len(),
        "Starting pki-controller"
    );

    let store = Arc::new(FileStore::new(&config.work_dir));
    let pki = PkiManager::new(store, cluster, config.pki.clone());
    let runner = Runner::new(config.max_attempts);

    let resource = format!("cluster/{}", pki.cluster().name());
    runner
        .run(&resource, || pki.reconcile())
        .await
        .context("cluster PKI did not converge")?;

    let pki = &pki;
    let runner = &runner;
    let results = futures::future::join_all(sessions.iter().map(|entry| async move {
        let session = &entry.session;
        let resource = format!("session/{}/{}", session.namespace(), session.name());
        let result = runner
            .run(&resource, || pki.reconcile_session(session, &entry.service_ip))
            .await;
        if let Err(e) = &result {
            tracing::error!(resource = %resource, "Session certificate failed: {e:#}");
        }
        result
    }))
    .await;

    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        anyhow::bail!("{failed} of {} session certificates failed", results.len());
    }

    tracing::info!("PKI is up to date");
    Ok(())
}
