// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! Store module.
//!
//! This module contains the mailbox and context storage contracts and the in-memory
//! implementation.
//!

pub mod error;
pub mod mailbox;
pub mod memory;

pub use error::Error;
pub use mailbox::{
    ChangeCallback, ContextStore, MailboxStore, Message, MessageId,
    Subscription,
};
pub use memory::MemoryStore;
