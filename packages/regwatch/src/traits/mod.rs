//! Core trait abstractions for the change-detection pipeline.
//!
//! These are the seams where applications plug in network access, object
//! storage, the revision database and the extraction model.

pub mod blob;
pub mod extractor;
pub mod fetcher;
pub mod store;
