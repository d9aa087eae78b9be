//! Common utilities and types shared across quire

pub mod config;
pub mod error;
pub mod util;

pub use config::ClientConfig;
pub use error::{Error, Result};
pub use util::{
    decode_component, encode_component, init_tracing, timestamp_now, timestamp_now_millis,
};
