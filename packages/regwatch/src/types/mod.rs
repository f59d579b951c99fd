//! Domain types for sources, captures, schemas and revisions.

pub mod capture;
pub mod revision;
pub mod schema;
pub mod source;
