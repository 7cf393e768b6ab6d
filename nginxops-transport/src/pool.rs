//! Bounded pool of idle SSH connections for one target.
//!
//! Bursty parallel operations may exceed the capacity briefly, since `get`
//! dials fresh connections when the queue is empty, while steady-state size stays
//! bounded because `put` discards surplus connections instead of queueing
//! them.

use std::collections::VecDeque;

use parking_lot::Mutex;

use nginxops_core::config::ServerTarget;

use crate::client::SshClient;
use crate::error::TransportError;

pub const DEFAULT_POOL_CAPACITY: usize = 5;

pub struct SshPool {
    target: ServerTarget,
    capacity: usize,
    idle: Mutex<VecDeque<SshClient>>,
}

impl SshPool {
    /// Create a pool for `target`, pre-warmed with `capacity / 2`
    /// connections. A capacity of 0 selects the default of 5.
    pub fn new(target: ServerTarget, capacity: usize) -> Result<Self, TransportError> {
        let capacity = if capacity == 0 {
            DEFAULT_POOL_CAPACITY
        } else {
            capacity
        };

        let pool = Self {
            target,
            capacity,
            idle: Mutex::new(VecDeque::with_capacity(capacity)),
        };

        for _ in 0..capacity / 2 {
            let client = SshClient::connect(&pool.target)?;
            pool.idle.lock().push_back(client);
        }

        Ok(pool)
    }

    /// Take a connection: the head of the idle queue if it passes a cheap
    /// liveness probe, otherwise a freshly dialed one.
    pub fn get(&self) -> Result<SshClient, TransportError> {
        let candidate = self.idle.lock().pop_front();
        match candidate {
            Some(client) if client.validate() => {
                tracing::debug!(host = %self.target.host, "reusing pooled connection");
                Ok(client)
            }
            Some(client) => {
                tracing::warn!(host = %self.target.host, "pooled connection is dead, dialing a new one");
                client.close();
                SshClient::connect(&self.target)
            }
            None => {
                tracing::debug!(host = %self.target.host, "pool empty, dialing a new connection");
                SshClient::connect(&self.target)
            }
        }
    }

    /// Return a connection. Dead clients and surplus beyond capacity are
    /// closed instead of queued.
    pub fn put(&self, client: SshClient) {
        if !client.is_alive() {
            client.close();
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.capacity {
            idle.push_back(client);
        } else {
            drop(idle);
            tracing::debug!(host = %self.target.host, "pool full, closing surplus connection");
            client.close();
        }
    }

    pub fn target(&self) -> &ServerTarget {
        &self.target
    }
}
