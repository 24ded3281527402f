//! # Delve Report
//!
//! Turns a finished research run into a rendered HTML report and publishes
//! it to durable storage. Rendering shells out to an R Markdown renderer;
//! publishing goes through an [`ObjectStore`].
//!
//! Report jobs are fire-and-forget: [`ReportPipeline::spawn`] logs any
//! failure and resolves to `None`.

pub mod pipeline;
pub mod renderer;
pub mod store;

pub use pipeline::{ReportError, ReportOutcome, ReportPipeline};
pub use renderer::ReportRenderer;
pub use store::{HttpObjectStore, LocalObjectStore, ObjectStore, object_key, store_from_config};
