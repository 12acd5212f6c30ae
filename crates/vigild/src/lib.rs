//! Vigil daemon library.
//!
//! Keeps an in-memory snapshot of a monitored service fleet current and
//! answers structured queries against it over HTTP.

pub mod config;
pub mod knowledge;
pub mod routes;
pub mod server;
pub mod source;

pub use config::Config;
pub use knowledge::{BuildReport, CollectionError, KnowledgeBase};
pub use source::{DataSource, SourceError};
