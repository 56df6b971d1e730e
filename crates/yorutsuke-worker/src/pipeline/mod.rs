//! Ingestion pipelines.
//!
//! - [`image`]: one upload, extracted by every backend and persisted once.
//! - [`batch`]: one result file of a bulk extraction job, streamed and
//!   persisted in bounded chunks.

pub mod batch;
pub mod image;

pub use batch::{BatchReport, ingest_batch};
pub use image::{ImageReport, ImageStage, ingest_image};
