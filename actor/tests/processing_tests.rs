// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

// Delivery, validation and drain pass tests.

mod common;

use actor::{
    ActorConfig, ActorId, BehaviorRef, DB_OP, Error, RuntimeConfig, SchemaRegistry,
};
use common::{UnmarkableStore, harness, harness_on, harness_with, machine_actor, open_schemas};
use futures::future::join_all;
use serde_json::json;
use store::{MailboxStore, MemoryStore};

use std::{sync::Arc, time::Duration};

#[tokio::test]
async fn test_message_without_schema_is_consumed() {
    let h = harness(open_schemas(&["PING"]));
    h.runtime
        .spawn_actor(machine_actor("A1", &["PING", "UNSCHEMED"]))
        .await
        .unwrap();
    h.deliver("A1", "UNSCHEMED", json!({})).await;
    h.deliver("A1", "PING", json!({})).await;
    h.runtime.run_until_idle().await;

    assert_eq!(h.engine.kinds_for("A1"), vec!["PING"]);
    assert!(h.pending("A1/inbox").await.is_empty());
}

#[tokio::test]
async fn test_actor_without_interface_accepts_nothing() {
    let h = harness(open_schemas(&["PING"]));
    h.runtime
        .spawn_actor(
            ActorConfig::new("A1").with_behavior(BehaviorRef::Machine("B1".to_owned())),
        )
        .await
        .unwrap();
    h.deliver("A1", "PING", json!({})).await;
    h.runtime.run_until_idle().await;

    assert!(h.engine.sends_for("A1").is_empty());
    assert!(h.pending("A1/inbox").await.is_empty());
}

#[tokio::test]
async fn test_schema_violation_is_consumed() {
    let schemas = SchemaRegistry::new().with_schema(
        "ADD",
        json!({"type": "object", "required": ["title"]}),
    );
    let h = harness(schemas);
    h.runtime
        .spawn_actor(machine_actor("A1", &["ADD"]))
        .await
        .unwrap();
    h.deliver("A1", "ADD", json!({"name": "x"})).await;
    h.deliver("A1", "ADD", json!({"title": "x"})).await;
    h.runtime.run_until_idle().await;

    let sends = h.engine.sends_for("A1");
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].payload["title"], "x");
    assert!(h.pending("A1/inbox").await.is_empty());
}

#[tokio::test]
async fn test_db_operation_requires_discriminator() {
    let h = harness(open_schemas(&[DB_OP]));
    h.runtime
        .spawn_actor(machine_actor("A1", &[DB_OP]))
        .await
        .unwrap();
    h.deliver("A1", DB_OP, json!([{"op": "put"}])).await;
    h.deliver("A1", DB_OP, json!({"table": "todos"})).await;
    h.deliver("A1", DB_OP, json!({"op": "put", "table": "todos"}))
        .await;
    h.runtime.run_until_idle().await;

    let sends = h.engine.sends_for("A1");
    assert_eq!(sends.len(), 1);
    assert_eq!(sends[0].payload["op"], "put");
    assert!(h.pending("A1/inbox").await.is_empty());
}

#[tokio::test]
async fn test_idempotency_key_is_merged() {
    let h = harness(open_schemas(&["SAVE", "COUNT"]));
    let id = h
        .runtime
        .spawn_actor(machine_actor("A1", &["SAVE", "COUNT"]))
        .await
        .unwrap();
    let saved = h
        .runtime
        .deliver_event(None, &id, "SAVE", json!({"title": "x"}))
        .await
        .unwrap();
    h.runtime
        .deliver_event(None, &id, "COUNT", json!(3))
        .await
        .unwrap();
    h.runtime.run_until_idle().await;

    let sends = h.engine.sends_for("A1");
    assert_eq!(
        sends[0].payload,
        json!({"title": "x", "idempotencyKey": saved.as_str()})
    );
    assert_eq!(sends[1].payload, json!(3));
}

#[tokio::test]
async fn test_handler_error_does_not_block_mailbox() {
    let h = harness(open_schemas(&["BOOM", "PING"]));
    h.engine.fail_on("BOOM");
    h.runtime
        .spawn_actor(machine_actor("A1", &["BOOM", "PING"]))
        .await
        .unwrap();
    h.deliver("A1", "BOOM", json!({})).await;
    h.deliver("A1", "PING", json!({})).await;
    h.runtime.run_until_idle().await;

    assert_eq!(h.engine.kinds_for("A1"), vec!["BOOM", "PING"]);
    assert!(h.pending("A1/inbox").await.is_empty());
    assert!(!h.engine.sends_for("A1")[0].handled);
}

#[tokio::test]
async fn test_last_sender_is_recorded() {
    let h = harness(open_schemas(&["PING"]));
    let id = h
        .runtime
        .spawn_actor(machine_actor("A1", &["PING"]))
        .await
        .unwrap();
    h.runtime
        .deliver_event(Some(&ActorId::from("B7")), &id, "PING", json!({}))
        .await
        .unwrap();
    h.runtime.run_until_idle().await;

    let snapshot = h.runtime.actor(&id).unwrap();
    assert_eq!(snapshot.last_sender, Some(ActorId::from("B7")));
    assert!(!snapshot.processing);
}

#[tokio::test]
async fn test_at_most_one_drain_in_flight() {
    let h = harness(open_schemas(&["PING"]));
    let id = h
        .runtime
        .spawn_actor(machine_actor("A1", &["PING"]))
        .await
        .unwrap();
    for n in 0..5 {
        h.deliver("A1", "PING", json!({"n": n})).await;
    }

    let results =
        join_all((0..4).map(|_| h.runtime.process_events(&id))).await;
    let passes = results
        .into_iter()
        .filter(|result| matches!(result, Ok(Some(_))))
        .count();
    assert_eq!(passes, 1);

    h.runtime.run_until_idle().await;
    assert_eq!(h.engine.max_in_flight(), 1);
    assert_eq!(h.engine.sends_for("A1").len(), 5);
    assert!(h.pending("A1/inbox").await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_debounce_coalesces_burst() {
    let h = harness_with(
        RuntimeConfig::default().with_debounce(Duration::from_millis(50)),
        open_schemas(&["PING"]),
    );
    h.runtime
        .spawn_actor(machine_actor("A1", &["PING"]))
        .await
        .unwrap();
    assert_eq!(h.runtime.tick().await, 1);

    for n in 0..5 {
        h.deliver("A1", "PING", json!({"n": n})).await;
    }
    assert_eq!(h.runtime.tick().await, 0);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(h.runtime.tick().await, 1);
    assert_eq!(h.engine.sends_for("A1").len(), 5);

    h.runtime.run_until_idle().await;
    assert_eq!(h.engine.sends_for("A1").len(), 5);
}

#[tokio::test(start_paused = true)]
async fn test_retry_waits_for_retry_delay() {
    let h = harness_with(
        RuntimeConfig::default()
            .with_debounce(Duration::ZERO)
            .with_retry_delay(Duration::from_millis(20)),
        open_schemas(&["X"]),
    );
    h.engine.guard("X", "OPEN");
    let id = h
        .runtime
        .spawn_actor(machine_actor("A1", &["X"]))
        .await
        .unwrap();
    h.runtime.run_until_idle().await;
    h.deliver("A1", "X", json!({})).await;

    let report = h.runtime.process_events(&id).await.unwrap().unwrap();
    assert!(report.retry);
    // The notification task queued by the push is still pending.
    assert_eq!(h.runtime.tick().await, 1);
    assert_eq!(h.runtime.tick().await, 0);

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(h.runtime.tick().await, 1);
    h.runtime.run_until_idle().await;
    assert_eq!(h.engine.kinds_for("A1"), vec!["X"]);
}

#[tokio::test]
async fn test_deliver_to_unknown_target() {
    let h = harness(open_schemas(&["PING"]));
    let result = h
        .runtime
        .deliver_event(None, &ActorId::from("ghost"), "PING", json!({}))
        .await;
    assert!(matches!(result, Err(Error::Resolution(target, _)) if target == "ghost"));
}

#[tokio::test]
async fn test_deliver_spawns_registered_target() {
    let h = harness(open_schemas(&["PING"]));
    h.runtime.register(machine_actor("A1", &["PING"]));
    assert!(!h.runtime.is_live(&ActorId::from("A1")));

    h.deliver("A1", "PING", json!({})).await;
    h.runtime.run_until_idle().await;

    assert!(h.runtime.is_live(&ActorId::from("A1")));
    assert_eq!(h.engine.kinds_for("A1"), vec!["PING"]);
}

#[tokio::test]
async fn test_deliver_wraps_spawn_failure() {
    let h = harness(open_schemas(&["PING"]));
    h.runtime.register(ActorConfig::new("A1").with_interface(["PING"]));
    let result = h
        .runtime
        .deliver_event(None, &ActorId::from("A1"), "PING", json!({}))
        .await;
    let Err(Error::Resolution(target, reason)) = result else {
        panic!("expected resolution error, got {:?}", result);
    };
    assert_eq!(target, "A1");
    assert!(reason.contains("missing behavior"));
}

#[tokio::test]
async fn test_symbolic_inbox_resolution() {
    let h = harness(open_schemas(&["PING"]));
    let result = h
        .runtime
        .spawn_actor(machine_actor("A1", &["PING"]).with_inbox("@main"))
        .await;
    assert!(matches!(result, Err(Error::Resolution(reference, _)) if reference == "@main"));
    assert!(!h.runtime.is_live(&ActorId::from("A1")));

    h.store.register_alias("@main", "M9").unwrap();
    let id = h
        .runtime
        .spawn_actor(machine_actor("A1", &["PING"]).with_inbox("@main"))
        .await
        .unwrap();
    assert_eq!(h.runtime.actor(&id).unwrap().mailbox, "M9");

    h.deliver("A1", "PING", json!({})).await;
    h.runtime.run_until_idle().await;
    assert_eq!(h.store.messages("M9").await.unwrap().len(), 1);
    assert_eq!(h.engine.kinds_for("A1"), vec!["PING"]);
}

#[tokio::test]
async fn test_unresolved_expression_is_rejected() {
    let h = harness(open_schemas(&["PING"]));
    let id = h
        .runtime
        .spawn_actor(machine_actor("A1", &["PING"]))
        .await
        .unwrap();
    let result = h
        .runtime
        .deliver_event(None, &id, "PING", json!({"to": "{{ctx.user}}"}))
        .await;
    assert_eq!(
        result,
        Err(Error::UnresolvedExpression("{{ctx.user}}".to_owned()))
    );
    assert!(h.store.messages("A1/inbox").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_init_sentinel_is_left_alone() {
    let h = harness(open_schemas(&["PING"]));
    h.runtime
        .spawn_actor(machine_actor("A1", &["PING", "INIT"]))
        .await
        .unwrap();
    h.store
        .push("A1/inbox", store::Message::new("INIT", json!({}), None, "A1"))
        .await
        .unwrap();
    h.deliver("A1", "PING", json!({})).await;
    h.runtime.run_until_idle().await;

    assert_eq!(h.engine.kinds_for("A1"), vec!["PING"]);
    let pending = h.pending("A1/inbox").await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].kind, "INIT");
}

#[tokio::test]
async fn test_unmarkable_message_is_dispatched_once() {
    let store = MemoryStore::new();
    let h = harness_on(
        RuntimeConfig::default().with_debounce(Duration::ZERO),
        open_schemas(&["PING"]),
        store.clone(),
        Arc::new(UnmarkableStore(store)),
    );
    let id = h
        .runtime
        .spawn_actor(machine_actor("A1", &["PING"]))
        .await
        .unwrap();
    h.deliver("A1", "PING", json!({"n": 1})).await;
    let idle =
        tokio::time::timeout(Duration::from_secs(5), h.runtime.run_until_idle()).await;
    assert!(idle.is_ok());
    assert_eq!(h.engine.kinds_for("A1"), vec!["PING"]);
    assert_eq!(h.pending("A1/inbox").await.len(), 1);

    // A later pass does not dispatch it again.
    h.deliver("A1", "PING", json!({"n": 2})).await;
    h.runtime.run_until_idle().await;
    let sends = h.engine.sends_for("A1");
    assert_eq!(sends.len(), 2);
    assert_eq!(sends[1].payload["n"], 2);

    let report = h.runtime.process_events(&id).await.unwrap().unwrap();
    assert_eq!(report.processed, 0);
    assert!(!report.retry);
}
