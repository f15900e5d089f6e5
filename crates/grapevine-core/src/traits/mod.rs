// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Adapter trait definitions for the Grapevine platform.
//!
//! Every external system the core talks to sits behind one of these traits:
//! the Telegram wire protocol, chat and embedding providers, the vector,
//! graph and cache stores, and the notification delivery surface. All use
//! `#[async_trait]` for dynamic dispatch.

pub mod cache;
pub mod chat;
pub mod delivery;
pub mod embedding;
pub mod graph;
pub mod telegram;
pub mod vector;

pub use cache::Cache;
pub use chat::ChatProvider;
pub use delivery::DeliverySurface;
pub use embedding::EmbeddingProvider;
pub use graph::GraphStore;
pub use telegram::{QrLogin, QrWaiter, TelegramClient, TelegramConnector};
pub use vector::VectorIndex;
