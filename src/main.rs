//! agentmesh - agent mesh control plane
//!
//! Usage:
//!   agentmesh serve                    → start the control plane
//!   agentmesh serve --config mesh.json → with a config file
//!   agentmesh version                  → show version

use agentmesh_core::{MeshConfig, PortAllocator};
use agentmesh_gateway::{
    AppState, GatewaySettings, RateGuard, ResolvedAuth,
};
use agentmesh_observability::{AlertEngine, MetricStore, Notifier, TraceRecorder};
use agentmesh_registry::{
    CapabilityEngine, IntegrationFacade, Registry, SecretVault, TemplateStore,
};
use agentmesh_runtime::{
    AdapterRegistry, Dispatcher, HealthMonitor, HealthMonitorConfig, HttpWorkerAdapter,
    Orchestrator, OrchestratorConfig, WorkflowEngine,
};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "agentmesh",
    about = "Agent mesh control plane: registry, deployment, dispatch, workflows",
    version = env!("CARGO_PKG_VERSION")
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the control plane
    Serve {
        /// Config file (JSON); env vars override it
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Gateway port
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Bind address
        #[arg(short, long, default_value = "0.0.0.0")]
        bind: String,
        /// Write logs to a file (in addition to stderr)
        #[arg(long)]
        log_file: Option<String>,
        /// Restart repeatedly failing agents automatically
        #[arg(long, default_value_t = false)]
        restart_policy: bool,
    },
    /// Show version
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("agentmesh v{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Serve {
            config,
            port,
            bind,
            log_file,
            restart_policy,
        }) => {
            init_tracing(log_file.as_deref());
            let config = match config {
                Some(path) => MeshConfig::load(&path),
                None => MeshConfig::from_env(),
            };
            serve(config, bind, port, restart_policy).await
        }
        None => {
            init_tracing(None);
            serve(MeshConfig::from_env(), "0.0.0.0".to_string(), 8080, false).await
        }
    }
}

fn init_tracing(log_file: Option<&str>) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match log_file {
        Some(path) => {
            let appender = tracing_appender::rolling::never(
                std::path::Path::new(path)
                    .parent()
                    .unwrap_or(std::path::Path::new(".")),
                std::path::Path::new(path)
                    .file_name()
                    .unwrap_or(std::ffi::OsStr::new("agentmesh.log")),
            );
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .with(tracing_subscriber::fmt::layer().with_writer(appender).with_ansi(false))
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(stderr_layer)
                .init();
        }
    }
}

async fn serve(
    config: MeshConfig,
    bind: String,
    port: u16,
    restart_policy: bool,
) -> anyhow::Result<()> {
    let client = reqwest::Client::new();
    let cancel = CancellationToken::new();

    // Process-wide singletons, passed as explicit dependencies.
    let ports = Arc::new(PortAllocator::new(
        config.agent.port_base,
        config.agent.port_capacity,
    ));
    let metrics = Arc::new(MetricStore::default());
    let traces = Arc::new(TraceRecorder::new(
        metrics.clone(),
        chrono::Duration::hours(24),
    ));
    let registry = Arc::new(Registry::new(config.models.supported.clone()));
    let templates = Arc::new(TemplateStore::new());

    let notifier = Arc::new(
        Notifier::new(
            metrics.clone(),
            config.notifier.retry_max,
            Duration::from_millis(config.notifier.backoff_base_ms),
        )
        .with_default_sinks(client.clone()),
    );
    let alerts = Arc::new(AlertEngine::new(metrics.clone(), notifier));

    let orchestrator = Arc::new(Orchestrator::new(
        registry.clone(),
        templates.clone(),
        ports,
        client.clone(),
        OrchestratorConfig {
            startup_deadline: Duration::from_secs(config.deploy.startup_deadline_sec),
            drain_deadline: Duration::from_secs(config.worker.drain_deadline_sec),
            work_root: PathBuf::from(&config.worker.work_root),
            worker_command: config.worker.command.clone(),
        },
    ));

    let adapters = AdapterRegistry::new(Arc::new(HttpWorkerAdapter::new(client.clone())));
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        traces.clone(),
        Arc::new(adapters),
        Duration::from_secs(config.dispatch.default_timeout_sec),
    ));
    let workflows = Arc::new(WorkflowEngine::new(registry.clone(), dispatcher.clone()));
    let capabilities = Arc::new(CapabilityEngine::new(registry.clone()));
    let integration = Arc::new(IntegrationFacade::new(registry.clone(), templates.clone()));

    let health = Arc::new(HealthMonitor::new(
        registry.clone(),
        orchestrator.clone(),
        metrics.clone(),
        client,
        HealthMonitorConfig {
            health_tick: Duration::from_secs(config.health.tick_sec),
            metrics_tick: Duration::from_secs(config.metrics.tick_sec),
            restart_policy,
        },
    ));

    // Background loops.
    health.start(cancel.clone());
    tokio::spawn(
        alerts
            .clone()
            .run(Duration::from_secs(config.alerts.tick_sec), cancel.clone()),
    );
    {
        let traces = traces.clone();
        let prune_cancel = cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(300));
            loop {
                tokio::select! {
                    _ = prune_cancel.cancelled() => return,
                    _ = interval.tick() => {
                        let pruned = traces.prune();
                        if pruned > 0 {
                            info!(pruned, "finished traces pruned");
                        }
                    }
                }
            }
        });
    }

    let secrets = match &config.secrets.master {
        Some(master) => Some(Arc::new(SecretVault::new(master)?)),
        None => None,
    };

    let state = Arc::new(AppState {
        auth: ResolvedAuth::new(config.token.secret.clone(), Vec::new()),
        rate: RateGuard::new(
            config.rate_limit.max_requests,
            config.rate_limit.window_sec,
        ),
        registry,
        templates,
        dispatcher,
        workflows,
        orchestrator,
        capabilities,
        health,
        traces,
        metrics,
        alerts,
        integration,
        secrets,
        started_at: std::time::Instant::now(),
    });

    let server = tokio::spawn(agentmesh_gateway::start_gateway(
        state,
        GatewaySettings { bind, port },
    ));

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    cancel.cancel();
    server.abort();
    Ok(())
}
