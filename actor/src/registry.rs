// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Actor registry
//!
//! Owns the actor table, the catalog of known configurations and the container and agent
//! indexes. The indexes hold nothing the actors do not also know: an id is indexed under a
//! key iff the actor is live and was placed under that key.
//!

use crate::{
    ActorConfig, ActorId, AgentKey, ContainerId,
    actor::{Actor, Placement, lock},
};

use tracing::debug;

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, RwLock},
};

/// Container and agent indexes.
#[derive(Debug, Default)]
pub(crate) struct ActorIndex {
    containers: HashMap<ContainerId, BTreeSet<ActorId>>,
    agents: HashMap<AgentKey, BTreeSet<ActorId>>,
}

impl ActorIndex {
    fn insert(&mut self, id: &ActorId, placement: &Placement) {
        self.containers
            .entry(placement.container.clone())
            .or_default()
            .insert(id.clone());
        if let Some(agent) = &placement.agent {
            self.agents
                .entry(agent.clone())
                .or_default()
                .insert(id.clone());
        }
    }

    fn remove(&mut self, id: &ActorId, placement: &Placement) {
        if let Some(ids) = self.containers.get_mut(&placement.container) {
            ids.remove(id);
            if ids.is_empty() {
                self.containers.remove(&placement.container);
            }
        }
        if let Some(agent) = &placement.agent {
            if let Some(ids) = self.agents.get_mut(agent) {
                ids.remove(id);
                if ids.is_empty() {
                    self.agents.remove(agent);
                }
            }
        }
    }

    fn in_container(&self, container: &ContainerId) -> Vec<ActorId> {
        self.containers
            .get(container)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn for_agent(&self, agent: &AgentKey) -> Vec<ActorId> {
        self.agents
            .get(agent)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    actors: RwLock<HashMap<ActorId, Arc<Actor>>>,
    catalog: RwLock<HashMap<ActorId, ActorConfig>>,
    index: Mutex<ActorIndex>,
}

impl Registry {
    pub fn get(&self, id: &ActorId) -> Option<Arc<Actor>> {
        self.actors
            .read()
            .ok()
            .and_then(|actors| actors.get(id).cloned())
    }

    pub fn contains(&self, id: &ActorId) -> bool {
        self.actors
            .read()
            .map(|actors| actors.contains_key(id))
            .unwrap_or(false)
    }

    pub fn ids(&self) -> Vec<ActorId> {
        self.actors
            .read()
            .map(|actors| actors.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Inserts `actor` unless its id is taken, in which case the live actor is returned as
    /// the error.
    pub fn insert(&self, actor: Arc<Actor>) -> Result<Arc<Actor>, Arc<Actor>> {
        let mut actors = match self.actors.write() {
            Ok(actors) => actors,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = actors.get(actor.id()) {
            return Err(existing.clone());
        }
        actors.insert(actor.id().clone(), actor.clone());
        debug!("Actor {} registered.", actor.id());
        Ok(actor)
    }

    /// Removes the actor from the table and from both indexes.
    pub fn remove(&self, id: &ActorId) -> Option<Arc<Actor>> {
        let removed = {
            let mut actors = match self.actors.write() {
                Ok(actors) => actors,
                Err(poisoned) => poisoned.into_inner(),
            };
            actors.remove(id)
        }?;
        if let Some(placement) = removed.set_placement(None) {
            lock(&self.index).remove(id, &placement);
        }
        debug!("Actor {} unregistered.", id);
        Some(removed)
    }

    /// Registers `actor` under `placement`, leaving any previous keys.
    ///
    /// Returns false, without touching the indexes, if the actor is no longer live.
    pub fn place(&self, actor: &Actor, placement: Placement) -> bool {
        let mut index = lock(&self.index);
        if !self.contains(actor.id()) {
            return false;
        }
        if let Some(previous) = actor.set_placement(Some(placement.clone())) {
            index.remove(actor.id(), &previous);
        }
        index.insert(actor.id(), &placement);
        true
    }

    pub fn in_container(&self, container: &ContainerId) -> Vec<ActorId> {
        lock(&self.index).in_container(container)
    }

    pub fn for_agent(&self, agent: &AgentKey) -> Vec<ActorId> {
        lock(&self.index).for_agent(agent)
    }

    pub fn register_config(&self, config: ActorConfig) {
        if let Ok(mut catalog) = self.catalog.write() {
            catalog.insert(config.id.clone(), config);
        }
    }

    pub fn config(&self, id: &ActorId) -> Option<ActorConfig> {
        self.catalog
            .read()
            .ok()
            .and_then(|catalog| catalog.get(id).cloned())
    }
}
