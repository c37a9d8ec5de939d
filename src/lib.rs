//! Legislature mirror library.
//!
//! Scrapes the proceedings published by Indian legislatures, stores each
//! document with a JSON sidecar, and uploads it to the Internet Archive.

// Allow raw string hashes for safety - they're harmless and prevent issues if content changes
#![allow(clippy::needless_raw_string_hashes)]

pub mod archive;
pub mod config;
pub mod constants;
pub mod fetch;
pub mod pipeline;
pub mod sites;
pub mod store;
pub mod text;
pub mod workspace;
