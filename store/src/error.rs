// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Store Error Types
//!
//! Errors raised by mailbox and context storage backends. Storage failures are loud: the
//! runtime propagates them to the caller that triggered the operation, except inside the
//! mailbox drain loop where a failing entry is logged and skipped.
//!
//! ## Error Categories
//!
//! - **CreateStore**: backend initialization failures (directory, connection, schema)
//! - **Store**: general read/write failures, including poisoned locks
//! - **EntryNotFound**: a message id or mailbox that does not exist
//! - **Unresolved**: a symbolic reference with no registered alias
//! - **Codec**: an envelope that could not be encoded or decoded
//!

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for storage backends.
///
/// All variants carry a human readable description and are serializable so they can be
/// shipped across process boundaries alongside the envelopes they refer to.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq)]
pub enum Error {
    /// Backend creation or initialization failure.
    #[error("Can't create store: {0}")]
    CreateStore(String),

    /// Read or write failure in the backend.
    #[error("Store error: {0}")]
    Store(String),

    /// The requested entry does not exist.
    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    /// A reference could not be resolved to a concrete store identifier.
    ///
    /// Symbolic references (prefixed with `@`) must be registered with
    /// [`MailboxStore::register_alias`](crate::mailbox::MailboxStore::register_alias)
    /// before they can be resolved.
    #[error("Can't resolve reference: {0}")]
    Unresolved(String),

    /// An envelope could not be encoded or decoded.
    #[error("Codec error: {0}")]
    Codec(String),
}
