//! Health Supervisor — component 4.5.
//!
//! Maintains a name → check mapping, evaluates every check on a fixed
//! interval and on demand, and runs one recovery attempt (a re-run of the
//! same check) whenever a check turns `Unhealthy`. Each evaluation has a
//! hard 5s timeout; a timeout or panic inside a check counts as `Unhealthy`
//! with the failure recorded, never as a crash propagating out of the
//! supervisor (spec §7's *Transient* error kind).

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use strum::Display;
use tokio::sync::Mutex;

use crate::bus::{Event, NotificationBus};

pub const CHECK_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_EVAL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub status: HealthStatus,
    pub details: String,
}

pub type CheckFuture = Pin<Box<dyn Future<Output = CheckResult> + Send>>;
pub type CheckFn = Arc<dyn Fn() -> CheckFuture + Send + Sync>;

struct CheckEntry {
    check: CheckFn,
    last_result: Mutex<Option<CheckResult>>,
}

/// Registry of named health checks plus the last observed result for each.
pub struct HealthSupervisor {
    checks: DashMap<String, CheckEntry>,
    bus: NotificationBus,
}

impl HealthSupervisor {
    pub fn new(bus: NotificationBus) -> Self {
        Self {
            checks: DashMap::new(),
            bus,
        }
    }

    pub fn register<F, Fut>(&self, name: impl Into<String>, check: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CheckResult> + Send + 'static,
    {
        let name = name.into();
        self.checks.insert(
            name,
            CheckEntry {
                check: Arc::new(move || Box::pin(check())),
                last_result: Mutex::new(None),
            },
        );
    }

    /// Evaluates every registered check, applying the 5s timeout and
    /// recovery-on-unhealthy rule, and returns the new snapshot.
    pub async fn evaluate_all(&self) -> HashMap<String, CheckResult> {
        let mut out = HashMap::new();
        let names: Vec<String> = self.checks.iter().map(|e| e.key().clone()).collect();
        for name in names {
            let result = self.evaluate_one(&name).await;
            out.insert(name, result);
        }
        out
    }

    async fn evaluate_one(&self, name: &str) -> CheckResult {
        let entry_check = self.checks.get(name).map(|e| e.check.clone());
        let Some(check) = entry_check else {
            return CheckResult {
                status: HealthStatus::Unhealthy,
                details: "unknown check".into(),
            };
        };

        let result = run_with_timeout(&check).await;

        let old = {
            let entry = self.checks.get(name).unwrap();
            let mut last = entry.last_result.lock().await;
            let old = last.clone();
            *last = Some(result.clone());
            old
        };

        if old.as_ref().map(|o| o.status) != Some(result.status) {
            self.bus.publish(Event::HealthChanged {
                check: name.to_string(),
                old: old.map(|o| o.status).unwrap_or(HealthStatus::Healthy),
                new: result.status,
            });
        }

        if result.status == HealthStatus::Unhealthy {
            self.bus.publish(Event::ServiceUnhealthy { check: name.to_string() });
            let recovery = run_with_timeout(&check).await;
            if recovery.status == HealthStatus::Unhealthy {
                self.bus.publish(Event::RecoveryFail {
                    check: name.to_string(),
                    error: recovery.details.clone(),
                });
            } else {
                self.bus.publish(Event::RecoveryOk { check: name.to_string() });
            }
        }

        result
    }

    /// Overall status: the worst of {healthy < degraded < unhealthy}
    /// across every registered check.
    pub async fn overall_status(&self) -> HealthStatus {
        let results = self.evaluate_all().await;
        results
            .values()
            .map(|r| r.status)
            .max()
            .unwrap_or(HealthStatus::Healthy)
    }
}

async fn run_with_timeout(check: &CheckFn) -> CheckResult {
    match tokio::time::timeout(CHECK_TIMEOUT, check()).await {
        Ok(result) => result,
        Err(_) => CheckResult {
            status: HealthStatus::Unhealthy,
            details: "check timed out after 5s".into(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overall_status_is_worst_of_all_checks() {
        let sup = HealthSupervisor::new(NotificationBus::new());
        sup.register("a", || async {
            CheckResult { status: HealthStatus::Healthy, details: "ok".into() }
        });
        sup.register("b", || async {
            CheckResult { status: HealthStatus::Degraded, details: "meh".into() }
        });
        assert_eq!(sup.overall_status().await, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn unhealthy_triggers_one_recovery_attempt() {
        let sup = HealthSupervisor::new(NotificationBus::new());
        sup.register("flaky", || async {
            CheckResult { status: HealthStatus::Unhealthy, details: "down".into() }
        });
        let results = sup.evaluate_all().await;
        assert_eq!(results["flaky"].status, HealthStatus::Unhealthy);
    }
}
