//! # quire
//!
//! Client-side orchestration engine for a sharded hierarchical document
//! store:
//! - Rendezvous-hashed placement over per-kind endpoint pools
//! - One retrying gateway in front of every backend call
//! - Alias-aware point lookup, sharded parallel multi-get, and filtered
//!   paginated range queries with a stable opaque cursor
//! - A locked, optimistically-validated write path over two stores
//!   (bodies and the canonical-id directory) with post-commit fan-out
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────────────────┐
//!                 │       StoreClient        │
//!                 │  retrieve / update APIs  │
//!                 └────┬────────────────┬────┘
//!                      │                │
//!            ┌─────────▼───────┐ ┌──────▼─────────┐
//!            │ RetrieveEngine  │ │  UpdateEngine  │
//!            └─────────┬───────┘ └──────┬─────────┘
//!                      │  RequestGateway │
//!                      └────────┬────────┘
//!                    HRW placement, retry loop
//!          ┌──────────┬─────────┼─────────┬──────────┐
//!        ┌─▼────┐ ┌───▼─────┐ ┌─▼─────┐ ┌─▼──────┐ ┌─▼──────┐
//!        │ Body │ │Directory│ │ Index │ │FullText│ │Counter │
//!        │ pool │ │  pool   │ │ pool  │ │  pool  │ │  pool  │
//!        └──────┘ └─────────┘ └───────┘ └────────┘ └────────┘
//! ```
//!
//! The backend pools, the authorization checker, the lock store, and the
//! fan-out sink are all trait objects; [`backend::memory`] ships complete
//! in-memory implementations.
//!
//! ## Usage
//!
//! ```no_run
//! use quire::{ClientConfig, Identity, StoreClient, TopologyRegistry};
//! use quire::addressing::Endpoint;
//! use quire::backend::memory::{AllowAll, MemoryBackend, MemoryLockStore};
//! use quire::fanout::NullFanout;
//! use quire::model::DocUri;
//! use std::sync::Arc;
//!
//! # async fn demo() -> quire::Result<()> {
//! let client = StoreClient::new(
//!     Arc::new(MemoryBackend::new()),
//!     TopologyRegistry::uniform(vec![Endpoint::new("vol-1", "mem://1")]),
//!     Arc::new(AllowAll),
//!     Arc::new(MemoryLockStore::new()),
//!     Arc::new(NullFanout),
//!     ClientConfig::default(),
//! )?;
//! client.probe().await?;
//!
//! let ctx = client.context(Identity::new("alice"));
//! client.put(DocUri::parse("/notes")?, serde_json::json!({"kind": "folder"}), &ctx).await?;
//! let uri = DocUri::parse("/notes/today")?;
//! client.put(uri.clone(), serde_json::json!({"body": "hi"}), &ctx).await?;
//! let _doc = client.get(&uri, &ctx).await?;
//! # Ok(())
//! # }
//! ```

pub mod addressing;
pub mod backend;
pub mod cache;
pub mod client;
pub mod common;
pub mod context;
pub mod fanout;
pub mod gateway;
pub mod model;
pub mod retrieve;
pub mod task;
pub mod update;

// Re-export commonly used types
pub use addressing::{Endpoint, StoreKind, TopologyRegistry};
pub use client::StoreClient;
pub use common::{ClientConfig, Error, Result};
pub use context::{Identity, OpContext};
pub use model::{Cursor, DocUri, Document, ResultSet, UpdateDescriptor, WriteRequest};

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build info
pub const BUILD_INFO: &str = concat!(env!("CARGO_PKG_VERSION"), " (", env!("CARGO_PKG_NAME"), ")");
