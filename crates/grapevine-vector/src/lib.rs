// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Vector store gateway for Grapevine.
//!
//! Two backends behind `grapevine_core::VectorIndex`: [`QdrantIndex`] for
//! production and [`MemoryIndex`] for tests and local development.

pub mod memory;
pub mod points;
pub mod qdrant;

pub use memory::MemoryIndex;
pub use points::{chunk_point_id, collection_name};
pub use qdrant::QdrantIndex;
