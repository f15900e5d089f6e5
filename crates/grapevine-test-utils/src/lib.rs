// SPDX-FileCopyrightText: 2026 Grapevine Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Scripted mocks for Grapevine tests: the Telegram transport, a chat
//! provider and the delivery surface. These run the same trait contracts
//! as the production adapters, so service tests are CI-runnable with no
//! external systems.

pub mod mock_chat;
pub mod mock_delivery;
pub mod mock_embedder;
pub mod mock_telegram;

pub use mock_chat::MockChat;
pub use mock_delivery::MockDelivery;
pub use mock_embedder::MockEmbedder;
pub use mock_telegram::MockTelegram;
