mod actions;
mod alerts;
mod changes;
mod collectors;
mod config;
mod diagnosis;
mod engine;
mod gateway;
mod http;
mod logs;
mod metrics;
mod snapshot;

use actions::ActionLog;
use axum::serve;
use clap::Parser;
use collectors::{NetworkCollector, SecurityCollector, ServicesCollector, SystemCollector};
use config::{Config, DiagnosisConfig};
use diagnosis::{DiagnosisGateway, GeminiClient};
use engine::{DomainEngine, PollingEngine};
use gateway::{CommandGateway, ShellRunner};
use metrics::Metrics;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sentineld")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    /// Keep the diagnosis endpoints disabled even when an API key is set.
    #[arg(long)]
    no_diagnosis: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(
        listen = %cfg.listen,
        services = cfg.services.len(),
        "starting sentineld"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };

    let diagnosis = match build_diagnosis(&cfg.diagnosis, cli.no_diagnosis) {
        Ok(d) => d,
        Err(err) => {
            error!(error = %err, "failed to initialise diagnosis client");
            std::process::exit(1);
        }
    };

    let gateway = Arc::new(
        CommandGateway::from_config(&cfg.gateway, Arc::new(ShellRunner))
            .with_metrics(metrics.clone()),
    );

    let polling = &cfg.polling;
    let system = Arc::new(
        PollingEngine::new(
            SystemCollector::new(gateway.clone()),
            polling.system.interval(),
            polling.system.update_capacity,
        )
        .with_metrics(metrics.clone())
        .on_snapshot({
            let metrics = metrics.clone();
            move |s| metrics.update_from_system(s)
        }),
    );
    let network = Arc::new(
        PollingEngine::new(
            NetworkCollector::new(gateway.clone()),
            polling.network.interval(),
            polling.network.update_capacity,
        )
        .with_metrics(metrics.clone())
        .on_snapshot({
            let metrics = metrics.clone();
            move |s| metrics.update_from_network(s)
        }),
    );
    let security = Arc::new(
        PollingEngine::new(
            SecurityCollector::new(gateway.clone()),
            polling.security.interval(),
            polling.security.update_capacity,
        )
        .with_metrics(metrics.clone()),
    );
    let services = Arc::new(
        PollingEngine::new(
            ServicesCollector::new(gateway.clone(), cfg.services.clone()),
            polling.services.interval(),
            polling.services.update_capacity,
        )
        .with_metrics(metrics.clone())
        .on_snapshot({
            let metrics = metrics.clone();
            move |s| metrics.update_from_services(s)
        }),
    );

    let engines: Vec<Arc<dyn DomainEngine>> = vec![
        system.clone(),
        network.clone(),
        security.clone(),
        services.clone(),
    ];
    for engine in &engines {
        engine.start();
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let state = http::HttpAppState {
            metrics: metrics.clone(),
            gateway: gateway.clone(),
            engines: engines.clone(),
            system: system.subscribe(),
            services: services.subscribe(),
            actions: Arc::new(ActionLog::seeded(snapshot::now_unix_millis())),
            diagnosis,
            logs: Arc::new(cfg.logs.clone()),
            dismiss_updates_after: polling.dismiss_updates_after_secs.map(Duration::from_secs),
        };
        let listen = cfg.listen.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(state);
            let addr: SocketAddr = match listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to bind HTTP listener");
                    return;
                }
            };
            info!(addr = %addr, "http server listening");

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "http server error");
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    for engine in &engines {
        engine.stop();
    }
    let _ = shutdown_tx.send(true);
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_diagnosis(
    cfg: &DiagnosisConfig,
    disabled: bool,
) -> Result<DiagnosisGateway, diagnosis::DiagnosisError> {
    if disabled {
        info!("diagnosis disabled by --no-diagnosis");
        return Ok(DiagnosisGateway::disabled());
    }
    match GeminiClient::from_config(cfg)? {
        Some(client) => {
            info!(model = %cfg.model, "diagnosis enabled");
            Ok(DiagnosisGateway::new(Arc::new(client)))
        }
        None => {
            warn!(
                api_key_env = %cfg.api_key_env,
                "no diagnosis API key configured, diagnosis disabled"
            );
            Ok(DiagnosisGateway::disabled())
        }
    }
}
