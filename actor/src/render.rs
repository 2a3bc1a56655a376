// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Rendering collaborators
//!
//! The runtime decides *when* an actor renders; drawing is delegated to a [`Renderer`] and
//! style computation to a [`StyleEngine`].
//!

use crate::{ActorId, AgentKey, ContainerId, Error};

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

/// Request to attach an actor's surface to a container.
#[derive(Clone, Debug, PartialEq)]
pub struct ViewAttachment {
    pub actor: ActorId,
    pub container: ContainerId,
    pub view: String,
    pub agent: Option<AgentKey>,
}

/// One render pass of one actor.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderRequest {
    pub actor: ActorId,
    pub view: String,
    /// Current context value.
    pub context: Value,
    /// Computed styles.
    pub styles: Value,
}

#[async_trait]
pub trait Renderer: Send + Sync + 'static {
    /// Creates (or moves) the actor's rendering surface inside a container.
    async fn attach_view(&self, attachment: ViewAttachment) -> Result<(), Error>;

    async fn render(&self, request: RenderRequest) -> Result<(), Error>;

    /// Releases the actor's surface.
    async fn cleanup_actor(&self, actor: &ActorId) -> Result<(), Error>;
}

#[async_trait]
pub trait StyleEngine: Send + Sync + 'static {
    async fn compute(
        &self,
        actor: &ActorId,
        style: Option<&str>,
    ) -> Result<Value, Error>;
}

/// Style engine that computes nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoStyles;

#[async_trait]
impl StyleEngine for NoStyles {
    async fn compute(
        &self,
        _actor: &ActorId,
        _style: Option<&str>,
    ) -> Result<Value, Error> {
        Ok(Value::Null)
    }
}

/// Renderer for runtimes without a display. Accepts every request.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeadlessRenderer;

#[async_trait]
impl Renderer for HeadlessRenderer {
    async fn attach_view(&self, attachment: ViewAttachment) -> Result<(), Error> {
        debug!(
            "View {} of {} attached to {}.",
            attachment.view, attachment.actor, attachment.container
        );
        Ok(())
    }

    async fn render(&self, request: RenderRequest) -> Result<(), Error> {
        debug!("Rendered {} for {}.", request.view, request.actor);
        Ok(())
    }

    async fn cleanup_actor(&self, _actor: &ActorId) -> Result<(), Error> {
        Ok(())
    }
}
