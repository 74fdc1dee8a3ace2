//! Test fixtures and mock physics for Runnel development.
//!
//! [`fixtures`] builds small element graphs (single meshes and reaches,
//! linked pairs, chains split across regions) with physics that keeps the
//! water balance easy to reason about.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

pub use fixtures::{channel, link, link_surface, mesh, mesh_line, FailingSink};
