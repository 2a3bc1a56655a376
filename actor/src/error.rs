// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Errors module
//!
//! Configuration and resolution failures are raised to the caller. Per-message failures
//! (rejected or failing messages) never surface as an [`Error`] from the drain loop; they
//! are logged and the message is consumed. See [`RejectReason`](crate::RejectReason) for
//! the rejection side.
//!

use crate::ActorId;

use thiserror::Error;

/// Error type for the actor runtime.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum Error {
    /// Actor configuration is missing a required reference after convention-based
    /// derivation.
    #[error("Invalid configuration for actor {0}: {1}")]
    Config(ActorId, String),
    /// A symbolic reference or a delivery target could not be resolved.
    #[error("Can't resolve {0}: {1}")]
    Resolution(String, String),
    /// The actor is not registered.
    #[error("Actor {0} not found.")]
    NotFound(ActorId),
    /// Mailbox or context store failure.
    #[error("Store error: {0}")]
    Store(String),
    /// The behaviour engine failed.
    #[error("Behavior error: {0}")]
    Behavior(String),
    /// The renderer or style engine failed.
    #[error("Render error: {0}")]
    Render(String),
    /// The schema validator failed (not a validation rejection).
    #[error("Schema error: {0}")]
    Schema(String),
    /// The payload still contains a template expression.
    #[error("Payload contains unresolved expression: {0}")]
    UnresolvedExpression(String),
    /// The runtime has been shut down.
    #[error("Actor runtime is stopped.")]
    Stopped,
}

impl From<store::Error> for Error {
    fn from(error: store::Error) -> Self {
        match error {
            store::Error::Unresolved(reference) => {
                Error::Resolution(reference, "no alias registered".to_owned())
            }
            store::Error::Store(reason) => Error::Store(reason),
            other => Error::Store(other.to_string()),
        }
    }
}
