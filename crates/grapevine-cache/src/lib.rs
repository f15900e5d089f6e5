// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cache gateway for Grapevine: a redis-backed TTL key/value store for
//! production and a process-local implementation for tests.
//!
//! Key conventions live in `grapevine_core::traits::cache`.

pub mod memory;
pub mod redis;

pub use memory::MemoryCache;
pub use redis::RedisCache;
