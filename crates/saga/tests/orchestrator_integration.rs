//! Integration tests for saga orchestration and retry.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{EventId, InstanceId, InstanceStatus, StepStatus};
use global_event::GlobalEvent;
use messaging::{MessagingError, Producer, RecordingProducer};
use saga::workflows::{
    BANK_REGISTRATION, ORDER_CANCEL_PROCESS, ORDER_PROCESS, SOURCE_BANK, SOURCE_ORDER,
    SOURCE_PAYMENT, SOURCE_PRODUCT, SOURCE_USER, STATE_BANK_REGIS_CREATED, STATE_ORDER_CANCEL,
    STATE_ORDER_CREATED, STATE_PAYMENT_SUCCESS, STATE_PRODUCT_RESERVATION_FAILED,
    STATE_PRODUCT_RESERVATION_SUCCESS, STATE_USER_VALIDATION_SUCCESS,
};
use saga::{Orchestrator, PayloadCache, RetryEngine, RetryRequest, SagaError};
use serde_json::{Value, json};
use workflow_store::{
    CatalogDefinition, InMemoryWorkflowStore, NewInstanceStep, StepDefinition, StepOutcome,
    Transition, WorkflowDefinition, WorkflowStore, default_catalog,
};

struct TestHarness {
    orchestrator: Orchestrator<InMemoryWorkflowStore, RecordingProducer>,
    retry: RetryEngine<InMemoryWorkflowStore, RecordingProducer>,
    store: InMemoryWorkflowStore,
    producer: RecordingProducer,
    cache: PayloadCache,
}

impl TestHarness {
    async fn new() -> Self {
        Self::with_catalog(&default_catalog()).await
    }

    async fn with_catalog(catalog: &CatalogDefinition) -> Self {
        let store = InMemoryWorkflowStore::with_catalog(catalog).await.unwrap();
        let producer = RecordingProducer::new();
        let cache = PayloadCache::new();

        let orchestrator =
            Orchestrator::new(store.clone(), producer.clone()).with_cache(cache.clone());
        let retry = RetryEngine::new(store.clone(), producer.clone());

        Self {
            orchestrator,
            retry,
            store,
            producer,
            cache,
        }
    }

    async fn start_order(&self, instance: &str) {
        let event = GlobalEvent::builder()
            .instance_id(instance)
            .event_type(ORDER_PROCESS)
            .state(STATE_ORDER_CREATED)
            .source(SOURCE_ORDER)
            .response(json!({"ref": "R1", "product_id": "P-1", "quantity": 2}))
            .build();
        self.orchestrator.process_event(&event).await.unwrap();
    }

    /// Returns the last command published to `topic`.
    fn last_command(&self, topic: &str) -> GlobalEvent {
        let sent = self.producer.sent_to(topic);
        let message = sent.last().expect("no command published");
        GlobalEvent::from_slice(&message.payload).unwrap()
    }

    /// Answers a command the way a participating service does.
    async fn reply(
        &self,
        command: &GlobalEvent,
        state: &str,
        source: &str,
        status: &str,
        response: Value,
    ) -> Result<(), SagaError> {
        let code = if status == "success" { 200 } else { 500 };
        let event = GlobalEvent::builder()
            .event_id(command.event_id.clone())
            .instance_id(command.instance_id.clone())
            .event_type(command.event_type.clone())
            .state(state)
            .source(source)
            .status(status, code)
            .request(command.payload.request.clone())
            .response(response)
            .build();
        self.orchestrator.process_event(&event).await
    }

    async fn instance_status(&self, instance: &str) -> InstanceStatus {
        self.store
            .find_workflow_instance_by_id(&InstanceId::from(instance))
            .await
            .unwrap()
            .unwrap()
            .status
    }

    async fn step_status(&self, event_id: &EventId) -> StepStatus {
        self.store
            .find_workflow_instance_step_by_event_id(event_id)
            .await
            .unwrap()
            .unwrap()
            .status
    }
}

fn fan_out_catalog() -> CatalogDefinition {
    let step = |name: &str, topic: &str| StepDefinition {
        name: name.to_string(),
        service: format!("{name}-svc"),
        description: String::new(),
        topic: topic.to_string(),
        payload_keys: vec![SOURCE_ORDER.to_string()],
    };

    CatalogDefinition {
        steps: vec![
            step("notify_a", "a-topic"),
            step("notify_b", "b-topic"),
            step("notify_c", "c-topic"),
        ],
        workflows: vec![WorkflowDefinition {
            workflow_type: "broadcast".to_string(),
            description: String::new(),
            initiating_states: vec!["started".to_string()],
            transitions: vec![Transition {
                state: "started".to_string(),
                steps: vec!["notify_a".into(), "notify_b".into(), "notify_c".into()],
            }],
        }],
    }
}

#[tokio::test]
async fn order_created_starts_instance_and_dispatches_validation() {
    let h = TestHarness::new().await;
    let event = GlobalEvent::builder()
        .instance_id("I-1")
        .event_type(ORDER_PROCESS)
        .state(STATE_ORDER_CREATED)
        .source(SOURCE_ORDER)
        .response(json!({"ref": "R1"}))
        .build();

    h.orchestrator.process_event(&event).await.unwrap();

    assert_eq!(h.instance_status("I-1").await, InstanceStatus::InProgress);

    let rows = h
        .store
        .find_workflow_instance_steps(&InstanceId::from("I-1"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, StepStatus::InProgress);

    let sent = h.producer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].topic, "user-topic");
    assert_eq!(sent[0].key, "I-1");

    let command = GlobalEvent::from_slice(&sent[0].payload).unwrap();
    assert_eq!(command.payload.request, json!({"ref": "R1"}));
    assert_eq!(command.action, "redirect");
    assert_eq!(command.state, STATE_ORDER_CREATED);
    assert_eq!(command.instance_id.as_str(), "I-1");
    assert_ne!(command.event_id, event.event_id);
    assert_eq!(rows[0].event_id, command.event_id);
}

#[tokio::test]
async fn happy_path_completes_once_and_evicts_cache() {
    let h = TestHarness::new().await;
    h.start_order("I-1").await;

    let validate = h.last_command("user-topic");
    h.reply(
        &validate,
        STATE_USER_VALIDATION_SUCCESS,
        SOURCE_USER,
        "success",
        json!({"user_id": "U-1", "email": "a@example.com"}),
    )
    .await
    .unwrap();

    let reserve = h.last_command("product-topic");
    assert_eq!(reserve.payload.request["ref"], "R1");
    assert_eq!(reserve.payload.request["user_id"], "U-1");
    h.reply(
        &reserve,
        STATE_PRODUCT_RESERVATION_SUCCESS,
        SOURCE_PRODUCT,
        "success",
        json!({"price": 1500}),
    )
    .await
    .unwrap();

    let pay = h.last_command("payment-topic");
    assert_eq!(pay.payload.request["price"], 1500);
    assert_eq!(pay.payload.request["email"], "a@example.com");
    h.reply(
        &pay,
        STATE_PAYMENT_SUCCESS,
        SOURCE_PAYMENT,
        "success",
        json!({"payment_id": "PAY-1"}),
    )
    .await
    .unwrap();

    let complete = h.last_command("order-topic");
    assert_eq!(complete.payload.request, json!({"payment_id": "PAY-1"}));
    assert_eq!(h.instance_status("I-1").await, InstanceStatus::InProgress);

    h.reply(&complete, "order_completed", SOURCE_ORDER, "success", json!({}))
        .await
        .unwrap();

    let id = InstanceId::from("I-1");
    let resolved = h
        .store
        .find_workflow_instance_by_id(&id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved.status, InstanceStatus::Complete);
    assert!(h.cache.get(&id).await.is_none());
    let published = h.producer.sent().len();
    assert_eq!(published, 4);

    // Redelivery of the final event changes nothing.
    h.reply(&complete, "order_completed", SOURCE_ORDER, "success", json!({}))
        .await
        .unwrap();
    let again = h
        .store
        .find_workflow_instance_by_id(&id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(again.status, InstanceStatus::Complete);
    assert_eq!(again.updated_at, resolved.updated_at);
    assert_eq!(h.producer.sent().len(), published);
}

#[tokio::test]
async fn failed_step_fails_instance_at_terminal_wave() {
    let h = TestHarness::new().await;
    h.start_order("I-2").await;

    let validate = h.last_command("user-topic");
    h.reply(&validate, STATE_USER_VALIDATION_SUCCESS, SOURCE_USER, "success", json!({}))
        .await
        .unwrap();

    let reserve = h.last_command("product-topic");
    h.reply(
        &reserve,
        STATE_PRODUCT_RESERVATION_FAILED,
        SOURCE_PRODUCT,
        "error",
        json!({"reason": "out of stock"}),
    )
    .await
    .unwrap();
    assert_eq!(h.step_status(&reserve.event_id).await, StepStatus::Error);

    let cancel = h.last_command("order-topic");
    h.reply(&cancel, "order_cancelled", SOURCE_ORDER, "success", json!({}))
        .await
        .unwrap();

    assert_eq!(h.instance_status("I-2").await, InstanceStatus::Failed);
}

#[tokio::test]
async fn unknown_status_counts_as_failure() {
    let h = TestHarness::new().await;
    h.start_order("I-3").await;

    let validate = h.last_command("user-topic");
    h.reply(&validate, "user_validation_unknown", SOURCE_USER, "timeout", json!({}))
        .await
        .unwrap();

    assert_eq!(h.step_status(&validate.event_id).await, StepStatus::Error);
    assert_eq!(h.instance_status("I-3").await, InstanceStatus::Failed);
}

#[tokio::test]
async fn replayed_event_leaves_cache_unchanged() {
    let h = TestHarness::new().await;
    h.start_order("I-4").await;
    let validate = h.last_command("user-topic");

    h.reply(&validate, STATE_USER_VALIDATION_SUCCESS, SOURCE_USER, "success", json!({"u": 1}))
        .await
        .unwrap();
    let first = h.cache.get(&InstanceId::from("I-4")).await.unwrap();

    h.reply(&validate, STATE_USER_VALIDATION_SUCCESS, SOURCE_USER, "success", json!({"u": 1}))
        .await
        .unwrap();
    let second = h.cache.get(&InstanceId::from("I-4")).await.unwrap();

    assert_eq!(first, second);
}

#[tokio::test]
async fn redelivered_initiating_event_reuses_instance() {
    let h = TestHarness::new().await;
    h.start_order("I-5").await;
    h.start_order("I-5").await;

    assert_eq!(h.instance_status("I-5").await, InstanceStatus::InProgress);
    assert_eq!(h.producer.sent_to("user-topic").len(), 2);
}

/// Records, for each publish, whether the step row already existed in progress.
struct RowCheckingProducer {
    store: InMemoryWorkflowStore,
    seen: Mutex<Vec<bool>>,
}

#[async_trait]
impl Producer for RowCheckingProducer {
    async fn send_message(&self, topic: &str, _key: &str, value: &[u8]) -> messaging::Result<()> {
        let event = GlobalEvent::from_slice(value).unwrap();
        let row = self
            .store
            .find_workflow_instance_step_by_event_id(&event.event_id)
            .await
            .unwrap();
        self.seen
            .lock()
            .unwrap()
            .push(row.is_some_and(|r| r.status == StepStatus::InProgress));
        Err(MessagingError::Injected(topic.to_string()))
    }
}

#[tokio::test]
async fn order_cancel_dispatches_release_and_refund_together() {
    let h = TestHarness::new().await;
    let event = GlobalEvent::builder()
        .instance_id("C-1")
        .event_type(ORDER_CANCEL_PROCESS)
        .state(STATE_ORDER_CANCEL)
        .source(SOURCE_ORDER)
        .response(json!({"order_id": "O-1", "payment_id": "PAY-1"}))
        .build();

    h.orchestrator.process_event(&event).await.unwrap();

    let release = h.last_command("product-topic");
    let refund = h.last_command("payment-topic");
    assert_ne!(release.event_id, refund.event_id);
    assert_eq!(release.payload.request["order_id"], "O-1");
    assert_eq!(refund.payload.request["payment_id"], "PAY-1");

    let rows = h
        .store
        .find_workflow_instance_steps(&InstanceId::from("C-1"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.status == StepStatus::InProgress));
    assert_eq!(h.instance_status("C-1").await, InstanceStatus::InProgress);
}

#[tokio::test]
async fn bank_registration_merges_account_into_link_step() {
    let h = TestHarness::new().await;
    let event = GlobalEvent::builder()
        .instance_id("B-1")
        .event_type(BANK_REGISTRATION)
        .state(STATE_BANK_REGIS_CREATED)
        .source(SOURCE_ORDER)
        .response(json!({"user_id": "U-1", "name": "Ana"}))
        .build();
    h.orchestrator.process_event(&event).await.unwrap();

    let create = h.last_command("bank-topic");
    h.reply(
        &create,
        "bank_account_created",
        SOURCE_BANK,
        "success",
        json!({"account_no": "ACC-1"}),
    )
    .await
    .unwrap();

    let link = h.last_command("user-topic");
    assert_eq!(
        link.payload.request,
        json!({"user_id": "U-1", "name": "Ana", "account_no": "ACC-1"})
    );

    h.reply(&link, "bank_account_linked", SOURCE_USER, "success", json!({}))
        .await
        .unwrap();
    assert_eq!(h.instance_status("B-1").await, InstanceStatus::Complete);
}

#[tokio::test]
async fn step_row_is_persisted_before_publish() {
    let store = InMemoryWorkflowStore::with_catalog(&default_catalog())
        .await
        .unwrap();
    let producer = Arc::new(RowCheckingProducer {
        store: store.clone(),
        seen: Mutex::new(Vec::new()),
    });
    let orchestrator = Orchestrator::new(store.clone(), producer.clone());

    let event = GlobalEvent::builder()
        .instance_id("I-6")
        .event_type(ORDER_PROCESS)
        .state(STATE_ORDER_CREATED)
        .source(SOURCE_ORDER)
        .response(json!({"ref": "R1"}))
        .build();
    orchestrator.process_event(&event).await.unwrap();

    assert_eq!(*producer.seen.lock().unwrap(), [true]);

    let rows = store
        .find_workflow_instance_steps(&InstanceId::from("I-6"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, StepStatus::InProgress);

    let stale = store
        .find_stale_instance_steps(chrono::Utc::now() + chrono::Duration::seconds(1))
        .await
        .unwrap();
    assert_eq!(stale.len(), 1);
}

#[tokio::test]
async fn fan_out_isolates_publish_failure() {
    let h = TestHarness::with_catalog(&fan_out_catalog()).await;
    h.producer.fail_on_call(2);

    let event = GlobalEvent::builder()
        .instance_id("I-7")
        .event_type("broadcast")
        .state("started")
        .source(SOURCE_ORDER)
        .response(json!({"ref": "R7"}))
        .build();
    h.orchestrator.process_event(&event).await.unwrap();

    let topics: Vec<_> = h.producer.sent().into_iter().map(|m| m.topic).collect();
    assert_eq!(topics, ["a-topic", "c-topic"]);

    let rows = h
        .store
        .find_workflow_instance_steps(&InstanceId::from("I-7"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.status == StepStatus::InProgress));
}

#[tokio::test]
async fn fan_out_isolates_row_failure() {
    let h = TestHarness::with_catalog(&fan_out_catalog()).await;
    h.store.fail_step_rows_for("notify_b");

    let event = GlobalEvent::builder()
        .instance_id("I-8")
        .event_type("broadcast")
        .state("started")
        .source(SOURCE_ORDER)
        .response(json!({}))
        .build();
    h.orchestrator.process_event(&event).await.unwrap();

    let topics: Vec<_> = h.producer.sent().into_iter().map(|m| m.topic).collect();
    assert_eq!(topics, ["a-topic", "c-topic"]);
    assert_eq!(h.store.instance_step_count().await, 2);
}

#[tokio::test]
async fn concurrent_instances_do_not_mix_payloads() {
    let h = Arc::new(TestHarness::new().await);

    let events: Vec<_> = (0..8)
        .map(|i| {
            GlobalEvent::builder()
                .instance_id(format!("C-{i}"))
                .event_type(ORDER_PROCESS)
                .state(STATE_ORDER_CREATED)
                .source(SOURCE_ORDER)
                .response(json!({"n": i}))
                .build()
        })
        .collect();

    let tasks: Vec<_> = events
        .into_iter()
        .map(|event| {
            let h = h.clone();
            tokio::spawn(async move { h.orchestrator.process_event(&event).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let sent = h.producer.sent_to("user-topic");
    assert_eq!(sent.len(), 8);
    for message in sent {
        let command = GlobalEvent::from_slice(&message.payload).unwrap();
        let n = command.payload.request["n"].as_i64().unwrap();
        assert_eq!(command.instance_id.as_str(), format!("C-{n}"));
        assert_eq!(message.key, command.instance_id.as_str());
    }
}

#[tokio::test]
async fn retry_redrives_failed_step_on_original_topic() {
    let h = TestHarness::new().await;
    h.start_order("R-1").await;
    let validate = h.last_command("user-topic");
    h.reply(&validate, STATE_USER_VALIDATION_SUCCESS, SOURCE_USER, "success", json!({}))
        .await
        .unwrap();
    let reserve = h.last_command("product-topic");
    h.reply(&reserve, STATE_PRODUCT_RESERVATION_FAILED, SOURCE_PRODUCT, "error", json!({}))
        .await
        .unwrap();
    let before = h.producer.sent().len();

    let retried = h
        .retry
        .retry_step(RetryRequest::new(reserve.event_id.clone(), "R-1"))
        .await
        .unwrap();

    assert_eq!(retried.event_id, reserve.event_id);
    assert_eq!(retried.action, "retry");
    assert_eq!(retried.status, "success");
    assert_eq!(retried.status_code, 200);

    let sent = h.producer.sent();
    assert_eq!(sent.len(), before + 1);
    assert_eq!(sent[before].topic, "product-topic");

    let row = h
        .store
        .find_workflow_instance_step_by_event_id(&reserve.event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, StepStatus::InProgress);
    assert!(row.completed_at.is_none());
    assert_eq!(row.event_message, Some(retried.to_json().unwrap()));

    // The service's answer to the retry closes the same row.
    h.reply(
        &retried,
        STATE_PRODUCT_RESERVATION_SUCCESS,
        SOURCE_PRODUCT,
        "success",
        json!({}),
    )
    .await
    .unwrap();
    assert_eq!(h.step_status(&reserve.event_id).await, StepStatus::Success);
}

#[tokio::test]
async fn product_quantity_retry_overrides_request() {
    let h = TestHarness::new().await;
    h.start_order("R-2").await;
    let validate = h.last_command("user-topic");
    h.reply(&validate, STATE_USER_VALIDATION_SUCCESS, SOURCE_USER, "success", json!({}))
        .await
        .unwrap();
    let reserve = h.last_command("product-topic");
    h.reply(&reserve, STATE_PRODUCT_RESERVATION_FAILED, SOURCE_PRODUCT, "error", json!({}))
        .await
        .unwrap();

    let err = h
        .retry
        .retry_product_quantity(reserve.event_id.clone(), "R-2", 0)
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::InvalidOverride(_)));

    let retried = h
        .retry
        .retry_product_quantity(reserve.event_id.clone(), "R-2", 1)
        .await
        .unwrap();
    assert_eq!(retried.state, "product_retry");
    assert_eq!(retried.payload.request["quantity"], 1);
    assert_eq!(retried.payload.request["product_id"], "P-1");
    assert_eq!(h.last_command("product-topic").state, "product_retry");
}

#[tokio::test]
async fn retry_rejects_step_not_in_error() {
    let h = TestHarness::new().await;
    h.start_order("R-3").await;
    let validate = h.last_command("user-topic");
    let before = h.store.find_workflow_instance_step_by_event_id(&validate.event_id).await.unwrap();
    let published = h.producer.sent().len();

    let err = h
        .retry
        .retry_step(RetryRequest::new(validate.event_id.clone(), "R-3"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        SagaError::StepNotFailed { status: StepStatus::InProgress, .. }
    ));
    assert!(err.to_string().contains("step is not in failed state"));
    assert_eq!(h.producer.sent().len(), published);
    let after = h.store.find_workflow_instance_step_by_event_id(&validate.event_id).await.unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn retry_rejects_unknown_step() {
    let h = TestHarness::new().await;
    h.start_order("R-4").await;
    let validate = h.last_command("user-topic");

    let err = h
        .retry
        .retry_step(RetryRequest::new(validate.event_id.clone(), "other-instance"))
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::StepNotFound { .. }));
}

async fn seed_failed_row(h: &TestHarness, instance: &str, event_id: &str, snapshot: &str) {
    h.start_order(instance).await;
    let step = h
        .store
        .find_steps_by_type_and_state(ORDER_PROCESS, STATE_ORDER_CREATED)
        .await
        .unwrap()
        .remove(0);
    h.store
        .create_workflow_instance_step(NewInstanceStep {
            event_id: EventId::from(event_id),
            workflow_instance_id: InstanceId::from(instance),
            step_id: step.step_id,
            status: StepStatus::InProgress,
            event_message: snapshot.to_string(),
            started_at: chrono::Utc::now(),
        })
        .await
        .unwrap();
    h.store
        .update_workflow_instance_step(StepOutcome {
            event_id: EventId::from(event_id),
            status: StepStatus::Error,
            status_code: 500,
            response: json!({}),
            event_message: snapshot.to_string(),
            completed_at: chrono::Utc::now(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn retry_rejects_missing_or_malformed_snapshot() {
    let h = TestHarness::new().await;
    seed_failed_row(&h, "R-5", "E-empty", "").await;
    seed_failed_row(&h, "R-6", "E-garbage", "not json").await;
    let published = h.producer.sent().len();

    let err = h
        .retry
        .retry_step(RetryRequest::new("E-empty", "R-5"))
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::MissingSnapshot(_)));

    let err = h
        .retry
        .retry_step(RetryRequest::new("E-garbage", "R-6"))
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::InvalidSnapshot { .. }));

    assert_eq!(h.producer.sent().len(), published);
    assert_eq!(h.step_status(&EventId::from("E-empty")).await, StepStatus::Error);
    assert_eq!(h.step_status(&EventId::from("E-garbage")).await, StepStatus::Error);
}

/// Drives an order until its reservation fails and the cancel wave fails the instance.
async fn fail_order_at_reservation(h: &TestHarness, instance: &str) -> GlobalEvent {
    h.start_order(instance).await;
    let validate = h.last_command("user-topic");
    h.reply(
        &validate,
        STATE_USER_VALIDATION_SUCCESS,
        SOURCE_USER,
        "success",
        json!({"user_id": "U-1"}),
    )
    .await
    .unwrap();

    let reserve = h.last_command("product-topic");
    h.reply(
        &reserve,
        STATE_PRODUCT_RESERVATION_FAILED,
        SOURCE_PRODUCT,
        "error",
        json!({"reason": "out of stock"}),
    )
    .await
    .unwrap();

    let cancel = h.last_command("order-topic");
    h.reply(&cancel, "order_cancelled", SOURCE_ORDER, "success", json!({"cancelled": true}))
        .await
        .unwrap();

    assert_eq!(h.instance_status(instance).await, InstanceStatus::Failed);
    reserve
}

#[tokio::test]
async fn retried_step_after_failed_instance_keeps_upstream_inputs() {
    let h = TestHarness::new().await;
    let reserve = fail_order_at_reservation(&h, "R-7").await;
    assert!(h.cache.get(&InstanceId::from("R-7")).await.is_none());

    let retried = h
        .retry
        .retry_step(RetryRequest::new(reserve.event_id.clone(), "R-7"))
        .await
        .unwrap();
    h.reply(
        &retried,
        STATE_PRODUCT_RESERVATION_SUCCESS,
        SOURCE_PRODUCT,
        "success",
        json!({"price": 10}),
    )
    .await
    .unwrap();

    let pay = h.last_command("payment-topic");
    assert_eq!(pay.instance_id.as_str(), "R-7");
    assert_eq!(pay.payload.request["user_id"], "U-1");
    assert_eq!(pay.payload.request["price"], 10);
    assert_eq!(h.step_status(&reserve.event_id).await, StepStatus::Success);
}

#[tokio::test]
async fn restarted_orchestrator_rebuilds_inputs_from_audit_log() {
    let h = TestHarness::new().await;
    h.start_order("I-6").await;
    let validate = h.last_command("user-topic");
    h.reply(
        &validate,
        STATE_USER_VALIDATION_SUCCESS,
        SOURCE_USER,
        "success",
        json!({"user_id": "U-6"}),
    )
    .await
    .unwrap();
    let reserve = h.last_command("product-topic");

    // A fresh process over the same store starts with an empty cache.
    let cache = PayloadCache::new();
    let restarted = Orchestrator::new(h.store.clone(), h.producer.clone()).with_cache(cache.clone());
    let event = GlobalEvent::builder()
        .event_id(reserve.event_id.clone())
        .instance_id("I-6")
        .event_type(ORDER_PROCESS)
        .state(STATE_PRODUCT_RESERVATION_SUCCESS)
        .source(SOURCE_PRODUCT)
        .status("success", 200)
        .response(json!({"price": 42}))
        .build();
    restarted.process_event(&event).await.unwrap();

    let pay = h.last_command("payment-topic");
    assert_eq!(pay.payload.request["ref"], "R1");
    assert_eq!(pay.payload.request["user_id"], "U-6");
    assert_eq!(pay.payload.request["price"], 42);

    let bag = cache.get(&InstanceId::from("I-6")).await.unwrap();
    assert_eq!(bag.len(), 3);
    assert_eq!(bag[SOURCE_PRODUCT], json!({"price": 42}));
}

#[tokio::test]
async fn failed_retry_publish_leaves_step_retryable() {
    let h = TestHarness::new().await;
    let reserve = fail_order_at_reservation(&h, "R-8").await;
    let before = h
        .store
        .find_workflow_instance_step_by_event_id(&reserve.event_id)
        .await
        .unwrap()
        .unwrap();

    h.producer.fail_topic("product-topic");
    let err = h
        .retry
        .retry_step(RetryRequest::new(reserve.event_id.clone(), "R-8"))
        .await
        .unwrap_err();
    assert!(matches!(err, SagaError::Messaging(_)));

    let restored = h
        .store
        .find_workflow_instance_step_by_event_id(&reserve.event_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(restored.status, StepStatus::Error);
    assert_eq!(restored.event_message, before.event_message);
    assert_eq!(restored.status_code, before.status_code);
    assert_eq!(restored.response, before.response);
    assert!(restored.completed_at.is_some());

    h.producer.heal();
    let retried = h
        .retry
        .retry_step(RetryRequest::new(reserve.event_id.clone(), "R-8"))
        .await
        .unwrap();
    assert_eq!(retried.event_id, reserve.event_id);
    assert_eq!(h.step_status(&reserve.event_id).await, StepStatus::InProgress);
    assert_eq!(h.last_command("product-topic").action, "retry");
}

/// Two branches whose completions both feed one merge step.
fn join_catalog() -> CatalogDefinition {
    let step = |name: &str, keys: &[&str]| StepDefinition {
        name: name.to_string(),
        service: format!("{name}-svc"),
        description: String::new(),
        topic: format!("{name}-topic"),
        payload_keys: keys.iter().map(|k| k.to_string()).collect(),
    };

    CatalogDefinition {
        steps: vec![
            step("left", &["origin-svc"]),
            step("right", &["origin-svc"]),
            step("merge", &["left-svc", "right-svc"]),
        ],
        workflows: vec![WorkflowDefinition {
            workflow_type: "join".to_string(),
            description: String::new(),
            initiating_states: vec!["started".to_string()],
            transitions: vec![
                Transition {
                    state: "started".to_string(),
                    steps: vec!["left".into(), "right".into()],
                },
                Transition {
                    state: "left_done".to_string(),
                    steps: vec!["merge".into()],
                },
                Transition {
                    state: "right_done".to_string(),
                    steps: vec!["merge".into()],
                },
            ],
        }],
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn parallel_completions_of_one_instance_are_serialized() {
    let h = Arc::new(TestHarness::with_catalog(&join_catalog()).await);
    let instances: Vec<String> = (0..16).map(|i| format!("J-{i}")).collect();

    for instance in &instances {
        let event = GlobalEvent::builder()
            .instance_id(instance.as_str())
            .event_type("join")
            .state("started")
            .source("origin-svc")
            .response(json!({"origin": instance}))
            .build();
        h.orchestrator.process_event(&event).await.unwrap();
    }

    let command_for = |topic: &str, instance: &str| {
        h.producer
            .sent_to(topic)
            .into_iter()
            .find(|m| m.key == instance)
            .map(|m| GlobalEvent::from_slice(&m.payload).unwrap())
            .unwrap()
    };

    let mut tasks = Vec::new();
    for instance in &instances {
        let left = command_for("left-topic", instance);
        let right = command_for("right-topic", instance);
        for (command, state, source, field) in [
            (left, "left_done", "left-svc", "left"),
            (right, "right_done", "right-svc", "right"),
        ] {
            let h = h.clone();
            tasks.push(tokio::spawn(async move {
                let response = json!({ field: command.instance_id.as_str() });
                h.reply(&command, state, source, "success", response).await
            }));
        }
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    for instance in &instances {
        let merges: Vec<GlobalEvent> = h
            .producer
            .sent_to("merge-topic")
            .into_iter()
            .filter(|m| m.key == *instance)
            .map(|m| GlobalEvent::from_slice(&m.payload).unwrap())
            .collect();
        assert_eq!(merges.len(), 2, "instance {instance}");

        // Whichever completion ran second saw the other's response.
        let last = merges.last().unwrap();
        assert_eq!(last.payload.request["left"], instance.as_str());
        assert_eq!(last.payload.request["right"], instance.as_str());

        let rows = h
            .store
            .find_workflow_instance_steps(&InstanceId::from(instance.as_str()))
            .await
            .unwrap();
        let branches: Vec<_> = rows
            .iter()
            .filter(|r| r.status != StepStatus::InProgress)
            .collect();
        assert_eq!(branches.len(), 2);
        assert!(branches.iter().all(|r| r.status == StepStatus::Success));
    }
}
