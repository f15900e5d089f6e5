// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graph store gateway for Grapevine: `User`, `Channel`, `Post` and `Tag`
//! nodes with `SUBSCRIBES`, `POSTED_IN`, `TAGGED` and `RELATED_TO` edges,
//! reached over the Neo4j HTTP transaction API.

pub mod cached;
pub mod http;

pub use cached::CachedGraph;
pub use http::Neo4jHttp;
