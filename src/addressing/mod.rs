//! Addressing and sharding: logical key to backend endpoint
//!
//! Each store kind (document bodies, canonical-id directory, secondary
//! index, full-text index, counter/allocator) has its own endpoint pool and
//! its own HRW ring, so the subsystems shard independently. The registry is
//! an explicit, injectable value; no process-global topology.

pub mod ring;

use ring::hrw_owner;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// The independently sharded backend store kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    Body,
    Directory,
    Index,
    FullText,
    Counter,
}

impl StoreKind {
    pub const ALL: [StoreKind; 5] = [
        StoreKind::Body,
        StoreKind::Directory,
        StoreKind::Index,
        StoreKind::FullText,
        StoreKind::Counter,
    ];
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKind::Body => write!(f, "body"),
            StoreKind::Directory => write!(f, "directory"),
            StoreKind::Index => write!(f, "index"),
            StoreKind::FullText => write!(f, "fulltext"),
            StoreKind::Counter => write!(f, "counter"),
        }
    }
}

/// One addressable backend server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: String,
    pub address: String,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
        }
    }
}

/// Injectable server topology: endpoint pools per store kind
#[derive(Debug, Clone, Default)]
pub struct TopologyRegistry {
    pools: HashMap<StoreKind, Vec<Endpoint>>,
}

impl TopologyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-pool topology: every store kind served by the same endpoints
    /// (common in small deployments and tests)
    pub fn uniform(endpoints: Vec<Endpoint>) -> Self {
        let mut registry = Self::new();
        for kind in StoreKind::ALL {
            registry.set_pool(kind, endpoints.clone());
        }
        registry
    }

    pub fn set_pool(&mut self, kind: StoreKind, endpoints: Vec<Endpoint>) {
        self.pools.insert(kind, endpoints);
    }

    pub fn pool(&self, kind: StoreKind) -> &[Endpoint] {
        self.pools.get(&kind).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Deterministically assign a key to the owning endpoint of a store kind
    ///
    /// An empty pool is a configuration error: terminal, never retried.
    pub fn assign(&self, kind: StoreKind, key: &str) -> crate::Result<Endpoint> {
        let pool = self.pool(kind);
        if pool.is_empty() {
            return Err(crate::Error::NoEndpoint(format!("{} store", kind)));
        }
        let ids: Vec<String> = pool.iter().map(|e| e.id.clone()).collect();
        let owner = hrw_owner(key, &ids)
            .ok_or_else(|| crate::Error::NoEndpoint(format!("{} store", kind)))?;
        pool.iter()
            .find(|e| e.id == owner)
            .cloned()
            .ok_or_else(|| crate::Error::NoEndpoint(format!("{} store", kind)))
    }

    /// Group keys by their owning endpoint, preserving the order keys were
    /// given in within each group. Used for batched calls.
    pub fn assign_groups<K: AsRef<str> + Clone>(
        &self,
        kind: StoreKind,
        keys: &[K],
    ) -> crate::Result<Vec<(Endpoint, Vec<K>)>> {
        let mut groups: Vec<(Endpoint, Vec<K>)> = Vec::new();
        for key in keys {
            let endpoint = self.assign(kind, key.as_ref())?;
            match groups.iter_mut().find(|(e, _)| *e == endpoint) {
                Some((_, bucket)) => bucket.push(key.clone()),
                None => groups.push((endpoint, vec![key.clone()])),
            }
        }
        Ok(groups)
    }
}
