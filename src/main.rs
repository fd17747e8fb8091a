// Copyright (c) 2025 Nikolay Denev <ndenev@gmail.com>
// SPDX-License-Identifier: BSD-3-Clause

mod cli;
mod output;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::prelude::*;

use cli::{Args, Command, OutputFormat, ProbeArgs, ScopeArgs, Selector};
use k8sinv::progress::{ProgressHandle, ProgressUpdate, create_progress_handle, create_spinner};
use k8sinv::artifacts::sort_artifacts;
use k8sinv::{
    Artifact, ArtifactLister, ClusterApi, Config, KubeCluster, NodeCollection, NodeInfoCollector,
    NodeProbeSpec, ResourceQuery, ScanReport, config,
};
use output::{QueryResult, render};

/// Initialize logging with file output and optional stderr
fn init_logging(verbose: bool) {
    use tracing_rolling_file::{RollingConditionBase, RollingFileAppenderBase};
    use tracing_subscriber::fmt::format::FmtSpan;

    let log_dir = config::base_dir()
        .map(|p| p.join("log"))
        .unwrap_or_else(|_| std::path::PathBuf::from("."));

    if let Err(e) = std::fs::create_dir_all(&log_dir) {
        eprintln!("Warning: Could not create log directory: {}", e);
        return;
    }

    // Rotate daily or at 10MB, keep 5 files
    let log_path = log_dir.join("k8sinv.log");
    let condition = RollingConditionBase::new()
        .daily()
        .max_size(10 * 1024 * 1024);

    let file_appender = match RollingFileAppenderBase::new(log_path, condition, 5) {
        Ok(appender) => appender,
        Err(e) => {
            eprintln!("Warning: Could not create log file: {}", e);
            return;
        }
    };

    let (non_blocking, _guard) = file_appender.get_non_blocking_appender();
    // Leak the guard to keep the background writer alive
    std::mem::forget(_guard);

    let filter = if verbose { "k8sinv=debug" } else { "k8sinv=info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_span_events(FmtSpan::NONE);

    if verbose {
        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_span_events(FmtSpan::NONE);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(stderr_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Install rustls crypto provider (aws-lc-rs)
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install rustls crypto provider"))?;

    let args = Args::parse();
    init_logging(args.verbose);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, cancelling");
                cancel.cancel();
            }
        });
    }

    match run(&args, &cancel).await {
        Ok(()) => Ok(()),
        Err(e) if matches!(e.downcast_ref::<k8sinv::Error>(), Some(k8sinv::Error::Cancelled)) => {
            eprintln!("Interrupted");
            std::process::exit(130);
        }
        Err(e) => Err(e),
    }
}

async fn run(args: &Args, cancel: &CancellationToken) -> Result<()> {
    let config = Config::load()?;
    let cluster: Arc<dyn ClusterApi> = Arc::new(
        KubeCluster::connect(args.context.as_deref())
            .await
            .context("Failed to connect to Kubernetes")?,
    );
    let progress = create_progress_handle();
    let show_spinner = matches!(args.output, OutputFormat::Table);

    match &args.command {
        Command::K8s {
            scope,
            exclude_owned,
            node_info,
            resources,
        } => {
            let lister = ArtifactLister::new(Arc::clone(&cluster), &config)
                .with_progress(Arc::clone(&progress));
            let mut query = scoped_query(ResourceQuery::from_config(&config), scope);
            if let Some(exclude) = exclude_owned {
                query = query.exclude_owned(*exclude);
            }

            let selector = Selector::parse(resources.as_deref()).map_err(|e| anyhow!(e))?;
            let mut artifacts = match selector {
                Selector::Single { kind, name } => {
                    let work = lister.get(&query, &kind, &name, cancel);
                    vec![with_spinner(show_spinner, &progress, "Fetching...", work).await?]
                }
                Selector::Kinds(kinds) => {
                    let query = query.resources(&kinds);
                    let work = lister.list_report(&query, cancel);
                    let msg = "Discovering resources...";
                    report_failures(with_spinner(show_spinner, &progress, msg, work).await?)
                }
                Selector::All => {
                    let work = lister.list_report(&query, cancel);
                    let msg = "Discovering resources...";
                    report_failures(with_spinner(show_spinner, &progress, msg, work).await?)
                }
            };

            if *node_info {
                let collector = NodeInfoCollector::new(Arc::clone(&cluster), &config)
                    .with_progress(Arc::clone(&progress));
                let spec = probe_spec(&config, &ProbeArgs::default());
                let work = collector.collect_report(&spec, cancel);
                let report = with_spinner(show_spinner, &progress, "Probing nodes...", work).await?;
                artifacts.extend(report_node_failures(report));
                sort_artifacts(&mut artifacts);
            }

            println!(
                "{}",
                render(
                    &args.output,
                    &artifacts,
                    || QueryResult::from_artifacts(&artifacts),
                    args.no_headers
                )
            );
        }
        Command::Nodes { probe } => {
            let collector = NodeInfoCollector::new(Arc::clone(&cluster), &config)
                .with_progress(Arc::clone(&progress));
            let spec = probe_spec(&config, probe);
            let work = collector.collect_report(&spec, cancel);
            let artifacts = report_node_failures(
                with_spinner(show_spinner, &progress, "Probing nodes...", work).await?,
            );

            println!(
                "{}",
                render(
                    &args.output,
                    &artifacts,
                    || QueryResult::from_node_info(&artifacts),
                    args.no_headers
                )
            );
        }
        Command::Bom { scope } => {
            let lister = ArtifactLister::new(Arc::clone(&cluster), &config)
                .with_progress(Arc::clone(&progress));
            let query = scoped_query(ResourceQuery::from_config(&config), scope);
            let work = lister.list_bom(&query, cancel);
            let msg = "Discovering resources...";
            let bom = with_spinner(show_spinner, &progress, msg, work).await?;
            println!(
                "{}",
                render(
                    &args.output,
                    &bom,
                    || QueryResult::from_bom(&bom),
                    args.no_headers
                )
            );
        }
    }

    Ok(())
}

/// Print skipped kind/namespace combinations and keep what was listed
fn report_failures(report: ScanReport) -> Vec<Artifact> {
    for failure in &report.failures {
        eprintln!("Warning: {}", failure);
    }
    report.artifacts
}

/// Print per-node failures and leaked probes and keep the node reports
fn report_node_failures(report: NodeCollection) -> Vec<Artifact> {
    for failure in &report.failures {
        eprintln!("Warning: {}", failure);
    }
    if !report.leaked.is_empty() {
        eprintln!(
            "Warning: probe pods left on the cluster: {}",
            report.leaked.join(", ")
        );
    }
    report.artifacts
}

fn scoped_query(query: ResourceQuery, scope: &ScopeArgs) -> ResourceQuery {
    if scope.all_namespaces {
        query.all_namespaces()
    } else if let Some(ns) = &scope.namespace {
        query.namespace(ns.as_str())
    } else {
        query
    }
}

fn probe_spec(config: &Config, probe: &ProbeArgs) -> NodeProbeSpec {
    let prefix = if probe.prefix.is_empty() {
        "k8sinv-node"
    } else {
        probe.prefix.as_str()
    };
    let mut spec = NodeProbeSpec::from_config(prefix, &config.probe);
    if let Some(ns) = &probe.namespace {
        spec = spec.in_namespace(ns.as_str());
    }
    if !probe.labels.is_empty() {
        spec = spec.with_labels(probe.labels.iter().cloned().collect::<BTreeMap<_, _>>());
    }
    spec
}

/// Drive `work` while showing progress events on a spinner
async fn with_spinner<T>(
    show: bool,
    progress: &ProgressHandle,
    msg: &str,
    work: impl Future<Output = T>,
) -> T {
    if !show {
        return work.await;
    }

    let spinner = create_spinner(msg);
    let mut progress_rx = progress.subscribe();
    let mut work = std::pin::pin!(work);

    let result = loop {
        tokio::select! {
            biased;
            update = progress_rx.recv() => {
                match update {
                    Ok(ProgressUpdate::Discovering) => {
                        spinner.set_message("Discovering resources...");
                    }
                    Ok(ProgressUpdate::DiscoveryComplete { kind_count, .. }) => {
                        spinner.set_message(format!("{} resource kinds found", kind_count));
                    }
                    Ok(ProgressUpdate::StartingScan { units }) => {
                        spinner.set_message(format!("Listing 0/{}...", units));
                    }
                    Ok(ProgressUpdate::UnitComplete { kind, .. }) => {
                        let (done, total) = progress.progress();
                        spinner.set_message(format!("Listing {}/{} ({})...", done, total, kind));
                    }
                    Ok(ProgressUpdate::ProbesCreated { count }) => {
                        spinner.set_message(format!("{} probes finished", count));
                    }
                    Ok(ProgressUpdate::ProbeComplete { node, success }) => {
                        let outcome = if success { "done" } else { "failed" };
                        spinner.set_message(format!("Probe on {} {}", node, outcome));
                    }
                    Ok(ProgressUpdate::CleanupComplete { deleted, .. }) => {
                        spinner.set_message(format!("Deleted {} probes", deleted));
                    }
                    Err(_) => {}
                }
            }
            result = &mut work => {
                break result;
            }
        }
    };

    spinner.finish_and_clear();
    result
}
