//! Backend client pool with sticky failover.
//!
//! All calls go to the pool's current client. When it fails with a
//! retryable error the remaining clients are probed once, in the order the
//! [`FailoverPolicy`] dictates, and the first one that answers becomes the
//! current client for every later call.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::metrics;
use crate::{QueryEngineError, Result};

pub trait FailoverPolicy: Send + Sync + fmt::Debug {
    /// Indices to probe, in order, after client `failed` of `len` failed.
    fn probe_order(&self, failed: usize, len: usize) -> Vec<usize>;
}

/// Probe the other clients in configuration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstHealthy;

impl FailoverPolicy for FirstHealthy {
    fn probe_order(&self, failed: usize, len: usize) -> Vec<usize> {
        (0..len).filter(|&i| i != failed).collect()
    }
}

/// Probe the clients following the failed one, wrapping around.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoundRobin;

impl FailoverPolicy for RoundRobin {
    fn probe_order(&self, failed: usize, len: usize) -> Vec<usize> {
        (1..len).map(|step| (failed + step) % len).collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailoverStrategy {
    #[default]
    FirstHealthy,
    RoundRobin,
}

impl FailoverStrategy {
    pub fn policy(self) -> Arc<dyn FailoverPolicy> {
        match self {
            FailoverStrategy::FirstHealthy => Arc::new(FirstHealthy),
            FailoverStrategy::RoundRobin => Arc::new(RoundRobin),
        }
    }
}

pub struct ClientPool<C> {
    backend: &'static str,
    clients: Vec<C>,
    current: Mutex<usize>,
    policy: Arc<dyn FailoverPolicy>,
}

impl<C: Clone> ClientPool<C> {
    pub fn new(
        backend: &'static str,
        clients: Vec<C>,
        policy: Arc<dyn FailoverPolicy>,
    ) -> Result<Self> {
        if clients.is_empty() {
            return Err(QueryEngineError::Configuration(format!(
                "no {} servers configured",
                backend
            )));
        }
        Ok(Self {
            backend,
            clients,
            current: Mutex::new(0),
            policy,
        })
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn current_index(&self) -> usize {
        *self.current.lock()
    }

    pub fn current(&self) -> (usize, C) {
        let index = self.current_index();
        (index, self.clients[index].clone())
    }

    /// Promotes `healthy` unless another call already moved away from `failed`.
    pub fn failover(&self, failed: usize, healthy: usize) {
        let mut current = self.current.lock();
        if *current == failed {
            *current = healthy;
            info!(
                "{} failover: client {} promoted after client {} failed",
                self.backend, healthy, failed
            );
        }
        metrics::record_failover(self.backend);
    }

    /// Runs `op` against the current client, failing over on retryable errors.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: Fn(C) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (failed, client) = self.current();
        let mut last_error = match op(client).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };
        warn!("{} client {} failed: {}", self.backend, failed, last_error);

        for candidate in self.policy.probe_order(failed, self.clients.len()) {
            match op(self.clients[candidate].clone()).await {
                Ok(value) => {
                    self.failover(failed, candidate);
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!("{} client {} failed: {}", self.backend, candidate, e);
                    last_error = e;
                }
            }
        }

        error!("all {} {} clients failed", self.clients.len(), self.backend);
        Err(QueryEngineError::BackendUnavailable(format!(
            "all {} {} clients failed, last error: {}",
            self.clients.len(),
            self.backend,
            last_error
        )))
    }
}
