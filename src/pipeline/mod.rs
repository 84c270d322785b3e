//! Request dispatch.
//!
//! Handlers are asked in registration order until one produces a
//! [`Response`]; every filter then sees that response, in order.

pub mod filters;
pub mod handlers;

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::http::request::Request;
use crate::http::response::Response;

pub use filters::{StatisticsFilter, StatisticsSnapshot};
pub use handlers::{FileHandler, NotFoundHandler};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no handler produced a response for {method} {target}")]
    NotHandled { method: String, target: String },
}

/// Turns a request into a response, or declines with `None`.
pub trait Handler: Send + Sync {
    fn handle(&self, request: &Request) -> Option<Response>;
}

impl<F> Handler for F
where
    F: Fn(&Request) -> Option<Response> + Send + Sync,
{
    fn handle(&self, request: &Request) -> Option<Response> {
        self(request)
    }
}

/// Post-processes every response before it is finalized.
pub trait Filter: Send + Sync {
    fn filter(&self, request: &Request, response: Response) -> Response;
}

impl<F> Filter for F
where
    F: Fn(&Request, Response) -> Response + Send + Sync,
{
    fn filter(&self, request: &Request, response: Response) -> Response {
        self(request, response)
    }
}

#[derive(Default)]
pub struct Pipeline {
    handlers: Vec<Box<dyn Handler>>,
    filters: Vec<Box<dyn Filter>>,
    statistics: Option<StatisticsFilter>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// File handler when a document root is configured, then the 404
    /// fallback; response statistics as the only filter.
    pub fn from_config(config: &ServerConfig) -> std::io::Result<Self> {
        let mut pipeline = Self::new();

        if let Some(root) = &config.document_root {
            pipeline.add_handler(FileHandler::new(root)?);
        }
        pipeline.add_handler(NotFoundHandler);

        let statistics = StatisticsFilter::new();
        pipeline.add_filter(statistics.clone());
        pipeline.statistics = Some(statistics);

        Ok(pipeline)
    }

    pub fn with_handler(mut self, handler: impl Handler + 'static) -> Self {
        self.add_handler(handler);
        self
    }

    pub fn with_filter(mut self, filter: impl Filter + 'static) -> Self {
        self.add_filter(filter);
        self
    }

    pub fn add_handler(&mut self, handler: impl Handler + 'static) {
        self.handlers.push(Box::new(handler));
    }

    pub fn add_filter(&mut self, filter: impl Filter + 'static) {
        self.filters.push(Box::new(filter));
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    pub fn filter_count(&self) -> usize {
        self.filters.len()
    }

    /// Statistics collected by [`Pipeline::from_config`] pipelines.
    pub fn statistics(&self) -> Option<&StatisticsFilter> {
        self.statistics.as_ref()
    }

    pub fn dispatch(&self, request: &Request) -> Result<Response, DispatchError> {
        let Some(response) = self
            .handlers
            .iter()
            .find_map(|handler| handler.handle(request))
        else {
            warn!(
                method = %request.method,
                target = %request.target,
                "no handler produced a response"
            );
            return Err(DispatchError::NotHandled {
                method: request.method.to_string(),
                target: request.target.clone(),
            });
        };

        debug!(status = response.status.as_u16(), "handled");

        Ok(self
            .filters
            .iter()
            .fold(response, |response, filter| filter.filter(request, response)))
    }
}
