//! RYM genre matching and hierarchy engine.
//!
//! Matches (artist, album) pairs against a Rate Your Music dataset dump,
//! expands genres through the RYM genre tree, and projects the result onto
//! library tag fields.

pub mod cache;
pub mod config;
pub mod dataset;
pub mod engine;
pub mod errors;
pub mod fetch;
pub mod hierarchy;
pub mod import;
pub mod library;
pub mod matcher;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod projector;
pub mod safety;
pub mod scoring;
pub mod single_flight;

pub use errors::{Error, Result};
