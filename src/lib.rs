//! Audit Extractor - config-driven extraction of dealership audit reports
//! into statistics, question/answer and file timeline tables.

pub mod aggregate;
pub mod classifier;
pub mod config;
pub mod error;
pub mod locator;
pub mod pdf;
pub mod pipeline;
pub mod reference;
pub mod schema;
pub mod scoring;
pub mod segmenter;
pub mod source;
pub mod stats;
