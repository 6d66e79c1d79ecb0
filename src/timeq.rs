//! Latency/bandwidth model for collaborators that sit next to the clocked grid.
//!
//! The hierarchy blocks advance one edge per cycle and have no notion of service time.
//! Bulk movers such as the DMA engine do, and are modeled as a `TimedServer`: every job
//! pays a fixed latency plus `size / bytes_per_cycle` cycles, jobs are served one after
//! another, and at most `queue_capacity` may be outstanding.

use std::collections::VecDeque;

use serde::Deserialize;

pub type Cycle = u64;

/// When an accepted job will be done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    issued_at: Cycle,
    ready_at: Cycle,
    size_bytes: u32,
}

impl Ticket {
    /// Ticket for a job that bypasses the server.
    pub fn immediate(now: Cycle, size_bytes: u32) -> Self {
        Self {
            issued_at: now,
            ready_at: now,
            size_bytes,
        }
    }

    pub fn issued_at(&self) -> Cycle {
        self.issued_at
    }

    pub fn ready_at(&self) -> Cycle {
        self.ready_at
    }

    pub fn size_bytes(&self) -> u32 {
        self.size_bytes
    }

    pub fn is_ready(&self, now: Cycle) -> bool {
        now >= self.ready_at
    }
}

#[derive(Debug)]
pub struct ServiceRequest<T> {
    pub payload: T,
    pub size_bytes: u32,
}

impl<T> ServiceRequest<T> {
    pub fn new(payload: T, size_bytes: u32) -> Self {
        Self { payload, size_bytes }
    }
}

#[derive(Debug)]
pub struct ServiceResult<T> {
    pub payload: T,
    pub ticket: Ticket,
}

/// A rejected job, handed back to the caller for a later retry.
#[derive(Debug)]
pub struct Backpressure<T> {
    pub request: ServiceRequest<T>,
    /// Earliest cycle a queue slot frees up.
    pub retry_at: Cycle,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub base_latency: Cycle,
    pub bytes_per_cycle: u32,
    pub queue_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_latency: 0,
            bytes_per_cycle: 1,
            queue_capacity: 1,
        }
    }
}

#[derive(Debug)]
pub struct TimedServer<T> {
    config: ServerConfig,
    inflight: VecDeque<ServiceResult<T>>,
    busy_until: Cycle,
}

impl<T> TimedServer<T> {
    pub fn new(config: ServerConfig) -> Self {
        assert!(config.bytes_per_cycle > 0, "bytes_per_cycle must be > 0");
        assert!(config.queue_capacity > 0, "queue_capacity must be > 0");
        Self {
            config,
            inflight: VecDeque::with_capacity(config.queue_capacity),
            busy_until: 0,
        }
    }

    pub fn try_enqueue(&mut self, now: Cycle, request: ServiceRequest<T>) -> Result<Ticket, Backpressure<T>> {
        if let Some(oldest) = self.inflight.front() {
            if self.inflight.len() >= self.config.queue_capacity {
                return Err(Backpressure {
                    request,
                    retry_at: oldest.ticket.ready_at(),
                });
            }
        }

        // jobs are serialized behind whatever is still in service
        let start = self.busy_until.max(now);
        let service = (request.size_bytes as u64).div_ceil(self.config.bytes_per_cycle as u64);
        let ticket = Ticket {
            issued_at: now,
            ready_at: start
                .saturating_add(self.config.base_latency)
                .saturating_add(service),
            size_bytes: request.size_bytes,
        };
        self.busy_until = ticket.ready_at;
        self.inflight.push_back(ServiceResult {
            payload: request.payload,
            ticket,
        });
        Ok(ticket)
    }

    /// Hand every job finished by `now` to `callback`, oldest first.
    pub fn service_ready<F>(&mut self, now: Cycle, mut callback: F)
    where
        F: FnMut(ServiceResult<T>),
    {
        while self.inflight.front().is_some_and(|job| job.ticket.is_ready(now)) {
            if let Some(job) = self.inflight.pop_front() {
                callback(job);
            }
        }
    }

    pub fn outstanding(&self) -> usize {
        self.inflight.len()
    }
}
