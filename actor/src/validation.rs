// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Message validation
//!
//! Every message is checked against the receiving actor's declared interface and against
//! the payload schema registered for its type before it reaches the behaviour engine.
//! Rejection is an ordinary value ([`RejectReason`]): the caller consumes the message and
//! moves on.
//!

use crate::{ActorConfig, Error};

use async_trait::async_trait;
use serde_json::{Map, Value};
use store::{Message, MessageId};
use thiserror::Error;
use tracing::debug;

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

/// Bookkeeping sentinel that is never dispatched nor marked processed.
pub const INIT: &str = "INIT";

/// Generic "apply database operation" message type.
pub const DB_OP: &str = "DB_OP";

/// Field a [`DB_OP`] payload must carry.
pub const DB_OP_FIELD: &str = "op";

/// Payload field the message identifier is merged into.
pub const IDEMPOTENCY_KEY: &str = "idempotencyKey";

/// Why a message was refused.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum RejectReason {
    #[error("actor declares no interface")]
    NoInterface,
    #[error("message type {0} is not part of the actor interface")]
    NotInInterface(String),
    #[error("no schema registered for message type {0}")]
    MissingSchema(String),
    #[error("payload must be an object carrying field `{0}`")]
    MalformedPayload(String),
    #[error("payload violates schema: {}", .0.join("; "))]
    SchemaViolation(Vec<String>),
    /// The validator itself failed.
    #[error("schema validator unavailable: {0}")]
    SchemaUnavailable(String),
}

/// Payload accepted for dispatch.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatedPayload {
    pub payload: Value,
    pub idempotency_key: Option<MessageId>,
}

/// Result of validating a payload against a schema.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SchemaCheck {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl SchemaCheck {
    pub fn valid() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            errors,
        }
    }
}

/// Schema lookup and validation contract.
#[async_trait]
pub trait SchemaValidator: Send + Sync + 'static {
    /// Schema registered for `kind`, if any.
    async fn load_schema(&self, kind: &str) -> Result<Option<Value>, Error>;

    async fn validate(
        &self,
        schema: &Value,
        payload: &Value,
    ) -> Result<SchemaCheck, Error>;
}

/// Contract, schema and shape checks run before dispatch.
#[derive(Clone)]
pub struct ValidationPipeline {
    validator: Arc<dyn SchemaValidator>,
}

impl ValidationPipeline {
    pub fn new(validator: Arc<dyn SchemaValidator>) -> Self {
        Self { validator }
    }

    /// Validates `message` for the actor configured by `config`.
    ///
    /// On success the payload is an owned copy; object payloads of messages that carry an
    /// identifier get it merged in under [`IDEMPOTENCY_KEY`].
    pub async fn validate(
        &self,
        config: &ActorConfig,
        message: &Message,
    ) -> Result<ValidatedPayload, RejectReason> {
        let interface =
            config.interface.as_ref().ok_or(RejectReason::NoInterface)?;
        if !interface.contains(&message.kind) {
            return Err(RejectReason::NotInInterface(message.kind.clone()));
        }

        let schema = self
            .validator
            .load_schema(&message.kind)
            .await
            .map_err(|e| RejectReason::SchemaUnavailable(e.to_string()))?
            .ok_or_else(|| RejectReason::MissingSchema(message.kind.clone()))?;

        if message.kind == DB_OP && !is_db_operation(&message.payload) {
            return Err(RejectReason::MalformedPayload(DB_OP_FIELD.to_owned()));
        }

        let check = self
            .validator
            .validate(&schema, &message.payload)
            .await
            .map_err(|e| RejectReason::SchemaUnavailable(e.to_string()))?;
        if !check.valid {
            return Err(RejectReason::SchemaViolation(check.errors));
        }

        let mut payload = message.payload.clone();
        if let (Some(id), Value::Object(fields)) = (&message.id, &mut payload) {
            fields.insert(
                IDEMPOTENCY_KEY.to_owned(),
                Value::String(id.as_str().to_owned()),
            );
        }
        debug!("Message {} accepted for {}.", message.kind, config.id);
        Ok(ValidatedPayload {
            payload,
            idempotency_key: message.id.clone(),
        })
    }
}

fn is_db_operation(payload: &Value) -> bool {
    payload
        .as_object()
        .is_some_and(|fields| fields.contains_key(DB_OP_FIELD))
}

/// In-memory [`SchemaValidator`].
///
/// Understands the JSON-schema keywords `type`, `enum`, `required`, `properties`,
/// `additionalProperties: false` and `items`. Unknown keywords are ignored.
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: RwLock<HashMap<String, Value>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(self, kind: &str, schema: Value) -> Self {
        self.register(kind, schema);
        self
    }

    pub fn register(&self, kind: &str, schema: Value) {
        let mut schemas = match self.schemas.write() {
            Ok(schemas) => schemas,
            Err(poisoned) => poisoned.into_inner(),
        };
        schemas.insert(kind.to_owned(), schema);
    }
}

#[async_trait]
impl SchemaValidator for SchemaRegistry {
    async fn load_schema(&self, kind: &str) -> Result<Option<Value>, Error> {
        let schemas = self
            .schemas
            .read()
            .map_err(|e| Error::Schema(e.to_string()))?;
        Ok(schemas.get(kind).cloned())
    }

    async fn validate(
        &self,
        schema: &Value,
        payload: &Value,
    ) -> Result<SchemaCheck, Error> {
        if !schema.is_object() && !schema.is_boolean() {
            return Err(Error::Schema(format!(
                "schema must be an object, got {}",
                schema
            )));
        }
        let mut errors = Vec::new();
        check(schema, payload, "$", &mut errors);
        if errors.is_empty() {
            Ok(SchemaCheck::valid())
        } else {
            Ok(SchemaCheck::invalid(errors))
        }
    }
}

fn check(schema: &Value, value: &Value, path: &str, errors: &mut Vec<String>) {
    let schema = match schema {
        Value::Bool(true) => return,
        Value::Bool(false) => {
            errors.push(format!("{}: no value is allowed", path));
            return;
        }
        Value::Object(schema) => schema,
        _ => return,
    };

    if let Some(expected) = schema.get("type") {
        let matches = match expected {
            Value::String(name) => has_type(value, name),
            Value::Array(names) => names
                .iter()
                .filter_map(Value::as_str)
                .any(|name| has_type(value, name)),
            _ => true,
        };
        if !matches {
            errors.push(format!("{}: expected type {}", path, expected));
            return;
        }
    }

    if let Some(Value::Array(allowed)) = schema.get("enum") {
        if !allowed.contains(value) {
            errors.push(format!("{}: value not in enum", path));
        }
    }

    match value {
        Value::Object(fields) => check_object(schema, fields, path, errors),
        Value::Array(items) => {
            if let Some(item_schema) = schema.get("items") {
                for (index, item) in items.iter().enumerate() {
                    check(item_schema, item, &format!("{}[{}]", path, index), errors);
                }
            }
        }
        _ => {}
    }
}

fn check_object(
    schema: &Map<String, Value>,
    fields: &Map<String, Value>,
    path: &str,
    errors: &mut Vec<String>,
) {
    if let Some(Value::Array(required)) = schema.get("required") {
        for name in required.iter().filter_map(Value::as_str) {
            if !fields.contains_key(name) {
                errors.push(format!("{}: missing required field {}", path, name));
            }
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    if let Some(properties) = properties {
        for (name, property) in properties {
            if let Some(field) = fields.get(name) {
                check(property, field, &format!("{}.{}", path, name), errors);
            }
        }
    }

    if schema.get("additionalProperties") == Some(&Value::Bool(false)) {
        for name in fields.keys() {
            let declared = properties.is_some_and(|p| p.contains_key(name));
            if !declared {
                errors.push(format!("{}: unexpected field {}", path, name));
            }
        }
    }
}

fn has_type(value: &Value, name: &str) -> bool {
    match name {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|n| n.fract() == 0.0)
        }
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        _ => false,
    }
}
