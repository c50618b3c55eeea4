//! Request gate: which request classes this instance serves.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, info};

use crate::error::GatewayError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequestClass {
    Ingest,
    Query,
    Delete,
}

impl RequestClass {
    pub const ALL: [RequestClass; 3] = [RequestClass::Ingest, RequestClass::Query, RequestClass::Delete];

    pub fn as_str(self) -> &'static str {
        match self {
            RequestClass::Ingest => "INGEST",
            RequestClass::Query => "QUERY",
            RequestClass::Delete => "DELETE",
        }
    }
}

impl fmt::Display for RequestClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GateConfigError {
    #[error("unknown server type {0:?}, expected ALL or a list of INGEST, QUERY, DELETE")]
    UnknownClass(String),
}

impl FromStr for RequestClass {
    type Err = GateConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RequestClass::ALL
            .into_iter()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| GateConfigError::UnknownClass(s.to_string()))
    }
}

/// The request classes enabled on this instance. Fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnabledSet {
    classes: BTreeSet<RequestClass>,
}

impl EnabledSet {
    pub fn all() -> Self {
        Self {
            classes: RequestClass::ALL.into_iter().collect(),
        }
    }

    pub fn none() -> Self {
        Self {
            classes: BTreeSet::new(),
        }
    }

    pub fn contains(&self, class: RequestClass) -> bool {
        self.classes.contains(&class)
    }

    /// Reject the request unless `class` is enabled. `uri` and `method`
    /// only feed the log line.
    pub fn check_allowed(
        &self,
        class: RequestClass,
        uri: &str,
        method: &str,
    ) -> Result<(), GatewayError> {
        debug!(server_type = %self, "checking request class");
        if self.contains(class) {
            return Ok(());
        }
        info!("Disabled request type: {class}, {method} request via URI \"{uri}\"");
        Err(GatewayError::Forbidden(class))
    }
}

impl Default for EnabledSet {
    fn default() -> Self {
        Self::all()
    }
}

/// `ALL`, or a comma-separated list of class names. Whitespace is ignored
/// and an empty string enables nothing.
impl FromStr for EnabledSet {
    type Err = GateConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        if compact == "ALL" {
            return Ok(Self::all());
        }

        let classes = compact
            .split(',')
            .filter(|name| !name.is_empty())
            .map(RequestClass::from_str)
            .collect::<Result<_, _>>()?;
        Ok(Self { classes })
    }
}

impl fmt::Display for EnabledSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<_> = self.classes.iter().map(|c| c.as_str()).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
