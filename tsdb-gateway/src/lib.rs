//! HTTP gateway in front of a time-series storage engine.
//!
//! Accepts data-point ingestion, runs read queries with results spooled
//! to disk and streamed back, deletes data, and reports its own request
//! timings as data points. Storage, query parsing and result formatting are
//! reached only through the contracts in the `model` crate.
//!
//! All routes live under `/api/v1`:
//!
//! | Route                                   | Class  |
//! |-----------------------------------------|--------|
//! | `GET /version`                          | -      |
//! | `GET /metricnames`, `/tagnames`, `/tagvalues` | QUERY  |
//! | `POST /datapoints`                      | INGEST |
//! | `GET /datapoints/index`                 | INGEST |
//! | `GET, POST /datapoints/query`           | QUERY  |
//! | `POST /datapoints/query/tags`           | QUERY  |
//! | `POST /datapoints/delete`               | DELETE |
//! | `DELETE /metric/{name}`                 | DELETE |

pub mod config;
pub mod error;
pub mod formatter;
pub mod gate;
pub mod http;
pub mod ingest;
pub mod memory;
pub mod query;
pub mod query_parser;
pub mod telemetry;

use std::sync::Arc;

use model::Datastore;

use crate::config::{ConfigError, GatewayConfig};
use crate::formatter::JsonFormatter;
use crate::gate::EnabledSet;
use crate::memory::MemoryMonitor;
use crate::query::{EngineSettings, QueryEngine};
use crate::query_parser::{JsonQueryParser, PluginRegistry};
use crate::telemetry::Telemetry;

pub use crate::error::{ErrorKind, GatewayError};

// ------------------------------------------------------------------ //
//  Shared application state                                           //
// ------------------------------------------------------------------ //

/// Shared state injected into every Axum handler via `State`.
pub struct AppState {
    pub gate: EnabledSet,
    pub engine: QueryEngine,
    pub datastore: Arc<dyn Datastore>,
    pub telemetry: Arc<Telemetry>,
    pub max_request_bytes: usize,
}

impl AppState {
    /// Wire the default parser and formatter around `datastore`.
    pub fn from_config(
        config: &GatewayConfig,
        datastore: Arc<dyn Datastore>,
        plugins: PluginRegistry,
    ) -> Result<Arc<Self>, ConfigError> {
        let gate = config.enabled_set()?;
        let telemetry = Arc::new(Telemetry::new(
            config.hostname.clone(),
            config.aggregate_stats,
            Arc::clone(&datastore),
        ));

        let monitor = MemoryMonitor::new(config.memory_monitor_percent).map(Arc::new);
        let settings = EngineSettings {
            return_query_in_response: config.return_query_in_response,
            log_queries: config.log_queries,
            memory_pause: config.memory_pause(),
        };
        let engine = QueryEngine::new(
            Arc::clone(&datastore),
            Arc::new(JsonQueryParser::new(plugins)),
            Arc::new(JsonFormatter::new(monitor)),
            Arc::clone(&telemetry),
            settings,
        );

        Ok(Arc::new(Self {
            gate,
            engine,
            datastore,
            telemetry,
            max_request_bytes: config.max_request_bytes,
        }))
    }
}
