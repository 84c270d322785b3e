use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::http::request::Request;
use crate::http::response::Response;
use crate::pipeline::Filter;

#[derive(Debug, Default)]
struct Counters {
    informational: AtomicU64,
    successful: AtomicU64,
    redirection: AtomicU64,
    client_error: AtomicU64,
    server_error: AtomicU64,
}

/// Counts responses by status class. Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct StatisticsFilter {
    counters: Arc<Counters>,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatisticsSnapshot {
    pub informational: u64,
    pub successful: u64,
    pub redirection: u64,
    pub client_error: u64,
    pub server_error: u64,
}

impl StatisticsSnapshot {
    pub fn total(&self) -> u64 {
        self.informational
            + self.successful
            + self.redirection
            + self.client_error
            + self.server_error
    }
}

impl StatisticsFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        let c = &self.counters;
        StatisticsSnapshot {
            informational: c.informational.load(Ordering::Relaxed),
            successful: c.successful.load(Ordering::Relaxed),
            redirection: c.redirection.load(Ordering::Relaxed),
            client_error: c.client_error.load(Ordering::Relaxed),
            server_error: c.server_error.load(Ordering::Relaxed),
        }
    }
}

impl Filter for StatisticsFilter {
    fn filter(&self, _request: &Request, response: Response) -> Response {
        let c = &self.counters;
        let status = response.status;
        let counter = if status.is_informational() {
            &c.informational
        } else if status.is_successful() {
            &c.successful
        } else if status.is_redirection() {
            &c.redirection
        } else if status.is_client_error() {
            &c.client_error
        } else {
            &c.server_error
        };
        counter.fetch_add(1, Ordering::Relaxed);
        response
    }
}
