// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ingestion for Grapevine: the subscription parser, the group mention
//! monitor and the optional link crawler. Everything here runs on the
//! ingestion loop, next to the Telegram clients it drives.

pub mod crawler;
pub mod monitor;
pub mod parser;

pub use crawler::LinkCrawler;
pub use monitor::{MentionMonitor, MonitorHandle};
pub use parser::{ParseAllReport, ParseReport, Parser};
