//! anycastd — anycast health-announcement daemon.
//!
//! Keeps the node's anycast prefixes announced over BGP exactly while the
//! node is healthy with respect to its configured probes, and withdrawn
//! otherwise. One check loop runs per configured service; the aggregate
//! verdict across all services gates a single shared announcement.

mod bootstrap;
mod config;
mod http;

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use announcer::metrics::PeerMetrics;
use announcer::{Announcer, BgpAnnouncer, BgpApi, GobgpClient};
use anyhow::Context;
use checkers::CheckerRegistry;
use clap::Parser;
use service::{
    Check, LivenessRegistry, Metrics, PrometheusMetrics, Service, ShutdownToken, Strategy,
};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

const PEER_METRICS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file.
    #[arg(long, env = "CONFIG_PATH", default_value = "/config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "anycastd=info".into()),
        )
        .init();

    let cfg = config::load(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    info!(version = env!("CARGO_PKG_VERSION"), "initializing anycastd");

    let shutdown = ShutdownToken::new();
    shutdown.install_signal_handlers();

    let speaker = Arc::new(GobgpClient::new(cfg.announcer.gobgp_endpoint.clone())?);
    bootstrap::start_speaker(speaker.as_ref(), &cfg.announcer)
        .await
        .context("starting BGP sessions")?;

    let registry = prometheus::Registry::new();
    let metrics: Arc<dyn Metrics> =
        Arc::new(PrometheusMetrics::new(env!("CARGO_PKG_VERSION"), &registry)?);

    let bgp_announcer: Arc<dyn Announcer> = Arc::new(BgpAnnouncer::new(announcer::Config {
        speaker: speaker.clone(),
        prefixes: cfg.announcer.routes.clone(),
        next_hop: cfg.announcer.local_address,
    }));

    let kinds = CheckerRegistry::with_builtins();
    let liveness = Arc::new(LivenessRegistry::new());
    let announced = Arc::new(AtomicBool::new(false));

    let mut tasks: JoinSet<anyhow::Result<()>> = JoinSet::new();

    info!("starting service initialization");
    for service_cfg in &cfg.services {
        let strategy = Strategy::from_config(
            service_cfg.strategy.as_deref(),
            service_cfg.strategy_params.as_ref(),
        )
        .with_context(|| format!("service `{}`", service_cfg.name))?;

        let mut checks = Vec::with_capacity(service_cfg.checks.len());
        for check in &service_cfg.checks {
            debug!(service = %service_cfg.name, kind = %check.kind, "registering check");
            let checker = kinds
                .new_by_kind(&check.kind, check.spec.clone())
                .with_context(|| format!("service `{}`", service_cfg.name))?;
            checks.push(Check::grouped(checker, check.group.clone()));
        }

        let service = Service::new(
            service_cfg.name.clone(),
            bgp_announcer.clone(),
            checks,
            service_cfg.check_interval,
            strategy,
            metrics.clone(),
            liveness.clone(),
            announced.clone(),
        );
        let token = shutdown.clone();
        tasks.spawn(async move { service.run(token).await.map_err(anyhow::Error::from) });
    }

    if cfg.metrics.enabled {
        debug!("metrics server enabled, initializing");

        let addr = cfg.metrics.address;
        let http_registry = registry.clone();
        let token = shutdown.clone();
        tasks.spawn(async move {
            http::serve(addr, http_registry, token)
                .await
                .map_err(anyhow::Error::from)
        });

        let peer_metrics = PeerMetrics::new(
            speaker.clone(),
            cfg.announcer.router_id.to_string(),
            PEER_METRICS_INTERVAL,
            &registry,
        )?;
        let token = shutdown.clone();
        tasks.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = peer_metrics.run() => {}
            }
            Ok(())
        });
    }

    info!("initialization completed");

    // The first task failure latches shutdown so the rest drain cleanly.
    let mut failure: Option<anyhow::Error> = None;
    while let Some(joined) = tasks.join_next().await {
        let result = match joined {
            Ok(result) => result,
            Err(err) => Err(anyhow::Error::from(err)),
        };
        if let Err(err) = result {
            if failure.is_none() {
                failure = Some(err);
            }
            shutdown.request_shutdown();
        }
    }

    if let Err(err) = speaker.stop_bgp().await {
        warn!(error = %err, "error stopping BGP session");
    }

    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}
