#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunker;
pub mod entity_extractor;
pub mod incremental;
pub mod pipeline;
pub mod readers;

pub use pipeline::config::IngestionTuning;
pub use pipeline::{ingest_folder, FileIngestOutcome, FolderIngestReport};
