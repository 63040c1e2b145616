use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use pingora_limits::rate::Rate;
use salvo::http::StatusCode;
use salvo::{Depot, FlowCtrl, Handler, Request, Response, Router, async_trait};

use crate::engine::Engine;

const RATE_HASHES: usize = 3;
const RATE_SLOTS: usize = 512;
const ENGINE_DEPOT_KEY: &str = "engine";

static RATE_LIMITED_COUNTERS: [AtomicUsize; 8] = [
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
    AtomicUsize::new(0),
];

pub fn periodic_rate_limit_report() {
    use tokio::time::interval;

    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(60 * 10));
        loop {
            interval.tick().await;
            let total = RATE_LIMITED_COUNTERS.iter().fold(0, |out, counter| {
                out + counter.swap(0, std::sync::atomic::Ordering::Relaxed)
            });
            if total > 0 {
                tracing::warn!("Rate limited requests in the last 10 minutes: {}", total);
            }
        }
    });
}

/// Makes the shared [`Engine`] handle reachable from any handler via
/// `depot.engine()`, the same "stash it in the depot, fetch it by key"
/// idiom salvo apps use for request-scoped dependency injection.
pub fn inject_engine(engine: Engine) -> impl Handler {
    InjectEngine(engine)
}

#[derive(Clone)]
struct InjectEngine(Engine);

#[async_trait]
impl Handler for InjectEngine {
    async fn handle(&self, _req: &mut Request, depot: &mut Depot, _res: &mut Response, _ctrl: &mut FlowCtrl) {
        depot.insert(ENGINE_DEPOT_KEY, self.0.clone());
    }
}

pub trait DepotEngineExt {
    fn engine(&self) -> &Engine;
}

impl DepotEngineExt for Depot {
    fn engine(&self) -> &Engine {
        self.get::<Engine>(ENGINE_DEPOT_KEY)
            .expect("engine should be injected by inject_engine hoop")
    }
}

pub trait RouterRateLimitExt {
    fn ip_rate_limit(self, quota: &RateLimit) -> Self;
}

#[derive(Clone)]
pub struct RateLimit {
    rate: Arc<Rate>,
    limit: u32,
}

impl RateLimit {
    #[must_use]
    pub fn new(limit: u32, interval: Duration) -> Self {
        let limit = limit.max(1);
        let interval = interval.max(Duration::from_secs(1));

        Self {
            rate: Arc::new(Rate::new_with_estimator_config(interval, RATE_HASHES, RATE_SLOTS)),
            limit,
        }
    }

    #[must_use]
    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }

    #[must_use]
    pub fn per_window(limit: u32, window: Duration) -> Self {
        Self::new(limit, window)
    }

    async fn rate_limit<T: std::hash::Hash>(&self, key: &T, res: &mut Response, ctrl: &mut FlowCtrl) {
        let observed = self.rate.observe(key, 1);

        if observed <= 0 || observed > self.limit as isize {
            RATE_LIMITED_COUNTERS[observed as usize % RATE_LIMITED_COUNTERS.len()]
                .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            res.status_code(StatusCode::TOO_MANY_REQUESTS);
            ctrl.cease();
        }
    }
}

#[derive(Clone)]
struct IpRateLimitHoop(RateLimit);

#[async_trait]
impl Handler for IpRateLimitHoop {
    async fn handle(&self, req: &mut Request, _: &mut Depot, res: &mut Response, ctrl: &mut FlowCtrl) {
        let ip = match req.remote_addr() {
            salvo::conn::SocketAddr::IPv4(a) => a.ip().to_ipv6_mapped(),
            salvo::conn::SocketAddr::IPv6(a) => *a.ip(),
            _ => return,
        };
        self.0.rate_limit(&ip, res, ctrl).await;
    }
}

impl RouterRateLimitExt for Router {
    fn ip_rate_limit(self, quota: &RateLimit) -> Self {
        self.hoop(IpRateLimitHoop(quota.clone()))
    }
}
