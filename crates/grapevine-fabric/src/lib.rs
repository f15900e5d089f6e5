// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Grapevine session fabric.
//!
//! One OS thread runs a current-thread runtime that owns every Telegram
//! client in the process. Other threads reach loop-pinned state only
//! through [`FabricHandle::submit`].

pub mod fabric;
pub mod registry;

pub use fabric::{Fabric, FabricContext, FabricHandle, FabricSeed};
pub use registry::{QrSession, QrSessionState, SessionRegistry};
