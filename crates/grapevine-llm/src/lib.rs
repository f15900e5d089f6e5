// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Chat completion providers for Grapevine: an OpenAI-compatible HTTP
//! client used for both the primary endpoint and the secondary fallback,
//! and the combinator chaining them.

pub mod client;
pub mod fallback;

pub use client::HttpChatClient;
pub use fallback::FallbackChat;
