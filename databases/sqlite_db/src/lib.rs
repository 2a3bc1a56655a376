// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # SQLite database module.
//!
//! This module contains the SQLite mailbox store implementation.
//!

mod sqlite;

pub use sqlite::{SqliteMailboxStore, open};
