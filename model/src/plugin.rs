//! Query plugins.
//!
//! Plugins are resolved by name when a query is parsed and carried in the
//! [`QueryDocument`](crate::QueryDocument). The gateway only invokes a
//! plugin through the capability its variant advertises.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::query::QueryDocument;
use crate::spool::SpoolFile;

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin {plugin} failed: {message}")]
    Failed { plugin: String, message: String },
    #[error("plugin io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Rewrites a query document before it is executed.
pub trait PreProcessingPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn pre_process(&self, query: QueryDocument) -> QueryDocument;
}

/// Derives a new result file from the formatted query output.
///
/// The input spool is consumed; returning it unchanged is allowed. A
/// replaced input is deleted when dropped.
pub trait PostProcessingPlugin: Send + Sync {
    fn name(&self) -> &str;

    fn process_query_results(&self, results: SpoolFile) -> Result<SpoolFile, PluginError>;
}

#[derive(Clone)]
pub enum QueryPlugin {
    PreProcessing(Arc<dyn PreProcessingPlugin>),
    PostProcessing(Arc<dyn PostProcessingPlugin>),
    /// A plugin the gateway has no hook for; kept so storage-side consumers
    /// can see it.
    Other(String),
}

impl QueryPlugin {
    pub fn name(&self) -> &str {
        match self {
            QueryPlugin::PreProcessing(p) => p.name(),
            QueryPlugin::PostProcessing(p) => p.name(),
            QueryPlugin::Other(name) => name,
        }
    }

    pub fn as_pre_processor(&self) -> Option<&dyn PreProcessingPlugin> {
        match self {
            QueryPlugin::PreProcessing(p) => Some(p.as_ref()),
            _ => None,
        }
    }

    pub fn as_post_processor(&self) -> Option<&dyn PostProcessingPlugin> {
        match self {
            QueryPlugin::PostProcessing(p) => Some(p.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Debug for QueryPlugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            QueryPlugin::PreProcessing(_) => "PreProcessing",
            QueryPlugin::PostProcessing(_) => "PostProcessing",
            QueryPlugin::Other(_) => "Other",
        };
        f.debug_tuple(kind).field(&self.name()).finish()
    }
}
