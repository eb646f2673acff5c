//! Client for a MangaDex-compatible catalog service.
//!
//! [`Client`] wraps a [`Transport`] and exposes one typed method per remote
//! operation. Models in [`models`] are decoded once and are immutable.

mod client;
pub mod error;
pub mod models;
pub mod query;
pub mod transport;

pub use crate::client::{Client, Endpoints, FOLLOW_PAGE_SIZE};
pub use crate::transport::Transport;
use std::sync::Arc;

pub type TransportHandle = Arc<dyn Transport + Send + Sync>;
