//! End-to-end tests for the full telederived stack.
//!
//! Each test wires the real `SQLite` store (in memory), the real application
//! workers and the real axum router. Only the broker is replaced, by a bus
//! that records what would have been sent. No TCP port is bound.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use sqlx::SqlitePool;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower::ServiceExt;

use telederive_adapter_http_axum::router;
use telederive_adapter_http_axum::signature::{SignatureVerifier, sign};
use telederive_adapter_http_axum::state::AppState;
use telederive_adapter_storage_sqlite_sqlx::{Config, SqliteConfigStore};
use telederive_app::ports::{BusClient, InboundMessage};
use telederive_app::reconcile_worker::{
    ReconcileReason, ReconcileTrigger, RetryBackoff, run_reconcile_loop,
};
use telederive_app::reconciler::SubscriptionReconciler;
use telederive_app::rule_set::RuleSetHandle;
use telederive_app::state_cache::DeviceStateCache;
use telederive_app::telemetry_service::TelemetryService;
use telederive_app::write_through::{WriteThrough, run_write_through};
use telederive_domain::error::DeriveError;

const TIMEOUT: Duration = Duration::from_secs(1);
const SECRET: &str = "webhook-secret";

/// Bus double standing in for the broker.
#[derive(Default)]
struct MemoryBus {
    subscribed: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
}

impl MemoryBus {
    fn subscriptions(&self) -> Vec<String> {
        self.subscribed.lock().unwrap().clone()
    }

    /// Decoded inner `value` of every retained publish on `topic`.
    fn values(&self, topic: &str) -> Vec<serde_json::Value> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == topic)
            .map(|(_, bytes)| {
                let envelope: serde_json::Value = serde_json::from_slice(bytes).unwrap();
                serde_json::from_str(envelope["value"].as_str().unwrap()).unwrap()
            })
            .collect()
    }
}

impl BusClient for MemoryBus {
    fn subscribe(&self, topic: &str) -> impl Future<Output = Result<(), DeriveError>> + Send {
        self.subscribed.lock().unwrap().push(topic.to_string());
        async { Ok(()) }
    }

    fn unsubscribe(&self, topic: &str) -> impl Future<Output = Result<(), DeriveError>> + Send {
        self.subscribed.lock().unwrap().retain(|t| t != topic);
        async { Ok(()) }
    }

    fn publish_retained(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> impl Future<Output = Result<(), DeriveError>> + Send {
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload));
        async { Ok(()) }
    }
}

type Bus = Arc<MemoryBus>;

struct Stack {
    pool: SqlitePool,
    bus: Bus,
    rules: Arc<RuleSetHandle>,
    reconciler: Arc<SubscriptionReconciler<SqliteConfigStore, Bus>>,
    telemetry: TelemetryService<SqliteConfigStore, Bus>,
    persister: JoinHandle<()>,
}

/// Wire every component against a fresh in-memory database holding one
/// metered rack and one efficiency rule over a UPS and two PDUs.
async fn stack() -> Stack {
    let db = Config {
        database_url: "sqlite::memory:".to_string(),
        ..Config::default()
    }
    .build()
    .await
    .expect("in-memory database should initialise");
    let pool = db.pool().clone();
    seed(&pool).await;

    let store = SqliteConfigStore::new(pool.clone());
    let bus = Arc::new(MemoryBus::default());
    let cache = Arc::new(DeviceStateCache::new());
    let rules = Arc::new(RuleSetHandle::default());

    let (write_through, snapshots) = WriteThrough::channel(16);
    let persister = tokio::spawn(run_write_through(store.clone(), snapshots, TIMEOUT));

    let telemetry = TelemetryService::new(
        store.clone(),
        Arc::clone(&bus),
        Arc::clone(&cache),
        Arc::clone(&rules),
        write_through,
        TIMEOUT,
    );
    let reconciler = Arc::new(SubscriptionReconciler::new(
        store,
        Arc::clone(&bus),
        Arc::clone(&rules),
        cache,
        TIMEOUT,
    ));

    Stack {
        pool,
        bus,
        rules,
        reconciler,
        telemetry,
        persister,
    }
}

async fn seed(pool: &SqlitePool) {
    for (id, topic) in [
        ("meter", "site/meter"),
        ("ups", "site/ups"),
        ("pdu-1", "site/pdu-1"),
        ("pdu-2", "site/pdu-2"),
        ("sensor", "site/sensor"),
    ] {
        sqlx::query("INSERT INTO devices (id, topic) VALUES (?, ?)")
            .bind(id)
            .bind(topic)
            .execute(pool)
            .await
            .unwrap();
    }
    sqlx::query(
        "INSERT INTO cost_rules (id, label, device_id, source_key, rate_a, rate_b, target_topic, target_address) \
         VALUES ('6f1c2a4e-8d3b-4b7a-9c55-0e1f2a3b4c5d', 'Rack cost', 'meter', 'power', 1467.0, 0.1, 'derived/rack/cost', 'rack-1')",
    )
    .execute(pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO efficiency_rules (id, label, main_device_id, main_key, output_topic) \
         VALUES ('0a9b8c7d-6e5f-4a3b-8c1d-2e3f4a5b6c7d', 'Hall PUE', 'ups', 'power', 'derived/hall/pue')",
    )
    .execute(pool)
    .await
    .unwrap();
    sqlx::query(
        "INSERT INTO efficiency_load_terms (rule_id, position, device_id, keys) VALUES \
         ('0a9b8c7d-6e5f-4a3b-8c1d-2e3f4a5b6c7d', 0, 'pdu-1', '[\"p1\",\"p2\"]'), \
         ('0a9b8c7d-6e5f-4a3b-8c1d-2e3f4a5b6c7d', 1, 'pdu-2', '[\"p1\"]')",
    )
    .execute(pool)
    .await
    .unwrap();
}

fn message(topic: &str, payload: &str) -> InboundMessage {
    InboundMessage::new(topic, payload.as_bytes().to_vec())
}

async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

fn webhook(body: &str, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/reconfigure")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("X-Signature", signature);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_subscribe_to_every_rule_device_on_first_reconcile() {
    let stack = stack().await;

    let outcome = stack.reconciler.reconcile().await.unwrap();

    assert!(outcome.swapped);
    assert_eq!(outcome.generation, 1);
    let mut topics = stack.bus.subscriptions();
    topics.sort();
    assert_eq!(
        topics,
        vec!["site/meter", "site/pdu-1", "site/pdu-2", "site/ups"]
    );
}

#[tokio::test]
async fn should_leave_everything_untouched_when_nothing_changed() {
    let stack = stack().await;
    stack.reconciler.reconcile().await.unwrap();

    let outcome = stack.reconciler.reconcile().await.unwrap();

    assert!(!outcome.swapped);
    assert_eq!(outcome.bus_calls(), 0);
    assert_eq!(stack.rules.current().generation, 1);
}

#[tokio::test]
async fn should_unsubscribe_when_rule_disabled() {
    let stack = stack().await;
    stack.reconciler.reconcile().await.unwrap();

    sqlx::query("UPDATE cost_rules SET enabled = 0")
        .execute(&stack.pool)
        .await
        .unwrap();
    let outcome = stack.reconciler.reconcile().await.unwrap();

    assert_eq!(outcome.unsubscribed, vec!["site/meter".to_string()]);
    assert!(!stack.bus.subscriptions().contains(&"site/meter".to_string()));
    assert!(outcome.swapped);
}

#[tokio::test]
async fn should_keep_previous_rules_when_store_unavailable() {
    let stack = stack().await;
    stack.reconciler.reconcile().await.unwrap();

    stack.pool.close().await;
    let result = stack.reconciler.reconcile().await;

    assert!(matches!(result, Err(DeriveError::StoreUnavailable(_))));
    assert_eq!(stack.rules.current().generation, 1);
    assert_eq!(stack.bus.subscriptions().len(), 4);
}

#[tokio::test]
async fn should_restore_subscriptions_after_reconnect_while_store_closed() {
    let stack = stack().await;
    stack.reconciler.reconcile().await.unwrap();
    stack.pool.close().await;

    let outcome = stack.reconciler.resubscribe_active().await;

    assert_eq!(outcome.subscribed.len(), 4);
    assert!(outcome.failed.is_empty());
    assert_eq!(stack.reconciler.subscribed().await.len(), 4);
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_publish_cost_for_metered_device() {
    let stack = stack().await;
    stack.reconciler.reconcile().await.unwrap();

    let outcome = stack
        .telemetry
        .handle_message(&message(
            "site/meter",
            r#"{"Timestamp":"2024-05-01T12:00:00Z","value":"{\"power\":1500}"}"#,
        ))
        .await
        .unwrap();

    assert_eq!(outcome.published, 1);
    let values = stack.bus.values("derived/rack/cost");
    assert_eq!(values[0]["energy_kwh"], 1.5);
    assert_eq!(values[0]["cost_a"], 2200.5);
}

#[tokio::test]
async fn should_publish_efficiency_once_all_devices_reported() {
    let stack = stack().await;
    stack.reconciler.reconcile().await.unwrap();

    for (topic, payload) in [
        ("site/pdu-1", r#"{"value":{"p1":300,"p2":100}}"#),
        ("site/pdu-2", r#"{"value":{"p1":100}}"#),
        ("site/ups", r#"{"value":{"power":1000}}"#),
    ] {
        stack
            .telemetry
            .handle_message(&message(topic, payload))
            .await
            .unwrap();
    }

    let values = stack.bus.values("derived/hall/pue");
    assert_eq!(values.len(), 3);
    assert_eq!(values[0]["pue"], "N/A");
    assert_eq!(values[2]["pue"], 2.0);
}

#[tokio::test]
async fn should_persist_last_known_value_through_write_through() {
    let stack = stack().await;
    stack
        .telemetry
        .handle_message(&message("site/sensor", r#"{"value":{"temp":21.5}}"#))
        .await
        .unwrap();

    // Dropping the service closes the queue so the persister drains and stops.
    let Stack {
        pool,
        telemetry,
        persister,
        ..
    } = stack;
    drop(telemetry);
    persister.await.unwrap();

    let stored: (String,) =
        sqlx::query_as("SELECT last_known_value FROM devices WHERE id = 'sensor'")
            .fetch_one(&pool)
            .await
            .unwrap();
    let values: serde_json::Value = serde_json::from_str(&stored.0).unwrap();
    assert_eq!(values["temp"], 21.5);
}

#[tokio::test]
async fn should_warm_cache_from_persisted_values() {
    let stack = stack().await;
    sqlx::query(
        "UPDATE devices SET last_known_value = '{\"p1\":300,\"p2\":100}', \
         last_seen_at = '2024-05-01T11:00:00Z' WHERE id = 'pdu-1'",
    )
    .execute(&stack.pool)
    .await
    .unwrap();
    sqlx::query(
        "UPDATE devices SET last_known_value = '{\"p1\":100}', \
         last_seen_at = '2024-05-01T11:00:00Z' WHERE id = 'pdu-2'",
    )
    .execute(&stack.pool)
    .await
    .unwrap();
    stack.reconciler.reconcile().await.unwrap();

    assert_eq!(stack.telemetry.warm_up().await, 2);
    stack
        .telemetry
        .handle_message(&message("site/ups", r#"{"value":{"power":1000}}"#))
        .await
        .unwrap();

    let values = stack.bus.values("derived/hall/pue");
    assert_eq!(values[0]["pue"], 2.0);
}

#[tokio::test]
async fn should_drop_message_for_unknown_topic() {
    let stack = stack().await;

    let result = stack
        .telemetry
        .handle_message(&message("site/ghost", r#"{"value":{"power":1}}"#))
        .await;

    assert!(matches!(result, Err(DeriveError::UnresolvedDevice { .. })));
}

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

#[tokio::test]
async fn should_return_ok_when_health_check_called() {
    let (trigger, _requests) = ReconcileTrigger::channel(1);
    let app = router::build(AppState::new(SignatureVerifier::new(None), trigger));

    let resp = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn should_subscribe_new_device_after_signed_webhook() {
    let stack = stack().await;
    let (trigger, requests) = ReconcileTrigger::channel(1);
    let (stop, shutdown) = watch::channel(false);
    let worker = tokio::spawn(run_reconcile_loop(
        Arc::clone(&stack.reconciler),
        requests,
        RetryBackoff::default(),
        shutdown,
    ));
    trigger.request(ReconcileReason::Startup).unwrap();
    eventually(|| stack.bus.subscriptions().len() == 4).await;

    sqlx::query(
        "INSERT INTO cost_rules (id, label, device_id, source_key, rate_a, rate_b, target_topic) \
         VALUES ('9e8d7c6b-5a4f-4e3d-8c2b-1a0f9e8d7c6b', 'Sensor cost', 'sensor', 'power', 1.0, 1.0, 'derived/sensor/cost')",
    )
    .execute(&stack.pool)
    .await
    .unwrap();

    let app = router::build(AppState::new(SignatureVerifier::new(Some(SECRET)), trigger));
    let body = r#"{"event":"rules_changed"}"#;
    let resp = app
        .oneshot(webhook(body, Some(&sign(SECRET, body.as_bytes()))))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    eventually(|| {
        stack
            .bus
            .subscriptions()
            .contains(&"site/sensor".to_string())
    })
    .await;
    assert_eq!(stack.rules.current().generation, 2);

    stop.send(true).unwrap();
    worker.await.unwrap();
}

#[tokio::test]
async fn should_not_reconcile_on_forged_webhook() {
    let stack = stack().await;
    let (trigger, mut requests) = ReconcileTrigger::channel(1);
    let app = router::build(AppState::new(SignatureVerifier::new(Some(SECRET)), trigger));
    let body = r#"{"event":"rules_changed"}"#;

    let resp = app
        .oneshot(webhook(body, Some(&sign("wrong", body.as_bytes()))))
        .await
        .unwrap();

    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert!(requests.try_next().is_none());
    assert!(stack.bus.subscriptions().is_empty());
}
