//! Per-operation context
//!
//! One `OpContext` is constructed at the start of each logical client
//! operation and passed explicitly into every engine call and spawned unit
//! of work: the acting identity plus the request-scoped cache.

use crate::cache::OpCache;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// The identity a logical operation acts as
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub principal: String,
}

impl Identity {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
        }
    }

    /// Background/system identity for internal maintenance work
    pub fn system() -> Self {
        Self::new("system")
    }
}

/// Context for one logical client operation
#[derive(Clone)]
pub struct OpContext {
    pub identity: Identity,
    pub cache: Arc<OpCache>,
    /// Correlates log lines across the operation's sub-tasks
    pub op_id: String,
}

impl OpContext {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            cache: Arc::new(OpCache::new()),
            op_id: uuid::Uuid::new_v4().to_string(),
        }
    }
}
