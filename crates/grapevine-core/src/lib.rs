// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Grapevine content-intelligence platform.
//!
//! This crate provides the error type, shared domain types and the adapter
//! traits every gateway crate implements. Nothing here performs I/O.

pub mod error;
pub mod time;
pub mod traits;
pub mod types;

pub use error::GrapevineError;
pub use traits::{
    Cache, ChatProvider, DeliverySurface, EmbeddingProvider, GraphStore, QrLogin, QrWaiter,
    TelegramClient, TelegramConnector, VectorIndex,
};
pub use types::{
    AuthStatus, ChannelInfo, ChannelMessage, ChatMessage, ChatRequest, ChatResponse, ChunkPayload,
    ChunkPoint, DigestFrequency, GraphExpansion, GraphNeighbor, GraphPost, GroupMessage,
    IndexOutcome, NoticeKind, OutboundNotice, PostGraphContext, RenderFormat, SubscriptionTier,
    TagCount, TaggingStatus, TelegramCredentials, Urgency, VectorFilter, VectorHit,
};
