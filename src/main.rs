use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use salvo::catcher::Catcher;
use salvo::prelude::*;
use tokio::signal;
use tracing::info;

mod bus;
mod clock;
mod config;
mod edge;
mod engine;
mod error;
mod health;
mod ids;
mod prelude;
mod protocol;
mod session;
mod utils;

use crate::clock::{Scheduler, SystemClock};
use crate::engine::Engine;
use crate::engine::node::STALE_NODE_THRESHOLD_MS;
use crate::error::exit_fatal;
use crate::health::{CheckResult, HealthStatus, HealthSupervisor};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// `Running -> Draining -> Stopped` per spec §9. Plain `AtomicU8` rather
/// than a mutex since it's read far more often (every `"engine"` health
/// check tick) than written (twice, ever, per process).
#[derive(Clone)]
struct ServerState(Arc<AtomicU8>);

const STATE_RUNNING: u8 = 0;
const STATE_DRAINING: u8 = 1;
const STATE_STOPPED: u8 = 2;

impl ServerState {
    fn new() -> Self {
        Self(Arc::new(AtomicU8::new(STATE_RUNNING)))
    }

    fn set(&self, value: u8) {
        self.0.store(value, Ordering::SeqCst);
    }

    fn is_accepting(&self) -> bool {
        self.0.load(Ordering::SeqCst) != STATE_STOPPED
    }
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();
    config::init();
    let config = config::get();

    let _guard = config.log.guard(config.log_to_file);
    info!(log_level = %config.log.filter_level, "starting matchmaker core");

    let bus = bus::NotificationBus::new();
    let engine = Engine::new(Arc::new(SystemClock::new()), bus.clone(), config.clone());
    let server_state = ServerState::new();

    let health = Arc::new(HealthSupervisor::new(bus.clone()));
    register_health_checks(&health, engine.clone(), server_state.clone());

    let shutdown = engine.shutdown_token();
    let scheduler = Scheduler::new(shutdown.clone());
    spawn_periodic_tasks(&scheduler, engine.clone(), Arc::clone(&health), config.health_check_interval_ms);

    let node_listener = match tokio::net::TcpListener::bind(("0.0.0.0", config.matchmaker_port)).await {
        Ok(listener) => listener,
        Err(err) => exit_fatal("failed to bind node control TCP listener", err),
    };
    info!(port = config.matchmaker_port, "node control protocol listening");
    let node_task = tokio::spawn(protocol::run_node_listener(node_listener, engine.clone(), shutdown.clone()));

    let http_handle = if config.enable_webserver {
        Some(spawn_http_server(engine.clone(), config.http_port).await)
    } else {
        info!("webserver disabled by config");
        None
    };

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, draining");
    server_state.set(STATE_DRAINING);
    engine.begin_shutdown();

    if let Some(handle) = &http_handle {
        handle.stop_graceful(SHUTDOWN_DEADLINE);
    }
    let _ = tokio::time::timeout(SHUTDOWN_DEADLINE, node_task).await;

    server_state.set(STATE_STOPPED);
    info!("shutdown complete");
}

/// `"engine"`: healthy iff the server is still `Running`/`Draining`.
/// `"nodes"`: degraded with no eligible node but at least one registered;
/// unhealthy with no nodes at all and callers waiting.
fn register_health_checks(health: &HealthSupervisor, engine: Engine, server_state: ServerState) {
    health.register("engine", move || {
        let server_state = server_state.clone();
        async move {
            if server_state.is_accepting() {
                CheckResult { status: HealthStatus::Healthy, details: "running".into() }
            } else {
                CheckResult { status: HealthStatus::Unhealthy, details: "stopped".into() }
            }
        }
    });

    health.register("nodes", move || {
        let engine = engine.clone();
        async move {
            let stats = engine.stats();
            if stats.total_nodes == 0 && stats.queue_length > 0 {
                CheckResult {
                    status: HealthStatus::Unhealthy,
                    details: format!("no nodes registered, {} session(s) waiting", stats.queue_length),
                }
            } else if stats.eligible_nodes == 0 && stats.total_nodes > 0 {
                CheckResult {
                    status: HealthStatus::Degraded,
                    details: format!("{} node(s) registered, none eligible", stats.total_nodes),
                }
            } else {
                CheckResult { status: HealthStatus::Healthy, details: format!("{} eligible", stats.eligible_nodes) }
            }
        }
    });
}

fn spawn_periodic_tasks(scheduler: &Scheduler, engine: Engine, health: Arc<HealthSupervisor>, health_interval_ms: u64) {
    let sweep_engine = engine.clone();
    scheduler.spawn_periodic("stale-node-sweep", SWEEP_INTERVAL, move || {
        let engine = sweep_engine.clone();
        async move {
            let removed = engine.sweep_stale_nodes();
            if removed > 0 {
                tracing::info!(removed, "stale node sweep");
            }
        }
    });

    let expiry_engine = engine.clone();
    scheduler.spawn_periodic("session-expiry-sweep", SWEEP_INTERVAL, move || {
        let engine = expiry_engine.clone();
        async move {
            let removed = engine.sweep_expired_sessions();
            if removed > 0 {
                tracing::info!(removed, "session expiry sweep");
            }
        }
    });

    scheduler.spawn_periodic(
        "health-evaluation",
        Duration::from_millis(health_interval_ms.max(1_000)),
        move || {
            let health = Arc::clone(&health);
            async move {
                health.evaluate_all().await;
            }
        },
    );

    tracing::debug!(threshold_ms = STALE_NODE_THRESHOLD_MS, "periodic tasks scheduled");
}

async fn spawn_http_server(engine: Engine, http_port: u16) -> ServerHandle {
    let service = Service::new(edge::root(engine)).catcher(Catcher::default());
    let acceptor = TcpListener::new(("0.0.0.0", http_port)).bind().await;
    let server = Server::new(acceptor);
    let handle = server.handle();
    info!(port = http_port, "http/ws edge listening");
    tokio::spawn(server.serve(service));
    handle
}

async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("ctrl_c signal received"),
        _ = terminate => info!("terminate signal received"),
    }
}

#[cfg(test)]
mod tests {
    use salvo::prelude::*;
    use salvo::test::{ResponseExt, TestClient};

    use crate::bus::NotificationBus;
    use crate::clock::SystemClock;
    use crate::config::MatchmakerConfig;
    use crate::engine::Engine;
    use std::sync::Arc;

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let engine = Engine::new(Arc::new(SystemClock::new()), NotificationBus::new(), MatchmakerConfig::default());
        let service = Service::new(crate::edge::root(engine));

        let content = TestClient::get("http://127.0.0.1:5800/health")
            .send(&service)
            .await
            .take_string()
            .await
            .unwrap();
        assert!(content.contains("\"success\":true"));
    }
}
