// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for the Grapevine platform: model structs, layered
//! loading and startup validation.

pub mod loader;
pub mod model;

pub use loader::{load_config, load_config_from_path, load_config_from_str, parse_cleanup_time, validate};
pub use model::GrapevineConfig;
