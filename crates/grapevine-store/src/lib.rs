// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Relational store gateway for Grapevine.
//!
//! SQLite behind tokio-rusqlite's single background thread: WAL mode,
//! enforced foreign keys with `ON DELETE CASCADE`, JSON columns as TEXT,
//! timestamps as RFC 3339 UTC strings. The single-writer discipline is what
//! makes invite consumption and batch commits atomic.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

pub use database::Database;
pub use models::{
    ChatGroup, Channel, CollectionSignature, DigestSettings, FeatureFlags, GroupMention,
    GroupSettings, IndexingStatus, InviteCode, NewPost, Post, Subscription, User,
};
