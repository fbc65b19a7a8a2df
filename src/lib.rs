pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod index;
pub mod library;
pub mod media;
mod metrics;
pub mod models;
pub mod pipeline;
pub mod query;
mod server;
pub mod singleflight;
pub mod utils;

pub use config::Opts;
pub use error::{Error, ModelError, Result};
pub use library::{MediaLibrary, MediaLibraryBuilder, Retention};
pub use pipeline::{IngestReport, IngestStatus, IngestionPipeline, PipelineConfig};
pub use query::{QueryEngine, QueryOptions, Scope, SearchResult};
