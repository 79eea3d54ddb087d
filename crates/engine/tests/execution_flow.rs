//! Integration tests driving the engine and compensator through the bus.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::{Context, WorkflowId};
use engine::topics::{
    self, CompensationCompletedPayload, CompensationDispatchPayload, ExecuteStepPayload,
    StepCompletedPayload, StepDispatchPayload, StepFailedPayload,
};
use engine::{
    Compensator, CompensatorEventHandler, Engine, EngineEventHandler, StepDefinition, StepError,
    StepStatus, StartWorkflow, WorkflowDefinition, WorkflowRegistry, WorkflowStatus,
};
use event_bus::{EventBus, EventEnvelope, EventHandler, InMemoryEventBus};
use serde_json::json;
use state_store::InMemoryStateStore;

const WORKFLOW_TYPE: &str = "transfer";

fn definition() -> WorkflowDefinition {
    WorkflowDefinition::new(
        WORKFLOW_TYPE,
        vec![
            StepDefinition::new("Debit", "transfer.debit").with_compensation("CreditBack"),
            StepDefinition::new("Credit", "transfer.credit").with_compensation("DebitBack"),
            StepDefinition::new("Notify", "transfer.notify"),
        ],
    )
}

/// Forward handler stub: completes every step except the configured one.
struct StubStepHandler {
    bus: InMemoryEventBus,
    topics: Vec<String>,
    fail_step: Option<String>,
    invocations: Mutex<Vec<String>>,
}

#[async_trait]
impl EventHandler for StubStepHandler {
    fn subscriptions(&self) -> Vec<String> {
        self.topics.clone()
    }

    async fn handle(&self, event: EventEnvelope) -> event_bus::Result<()> {
        let payload: StepDispatchPayload = serde_json::from_value(event.data)?;
        self.invocations
            .lock()
            .unwrap()
            .push(payload.step_name.clone());

        let envelope = if self.fail_step.as_deref() == Some(payload.step_name.as_str()) {
            topics::event(
                topics::STEP_FAILED,
                &StepFailedPayload {
                    workflow_id: payload.workflow_id,
                    step_name: payload.step_name,
                    error: StepError::message("stub failure"),
                },
            )?
        } else {
            let mut output = Context::new();
            output.insert(format!("{}Done", payload.step_name), json!(true));
            topics::event(
                topics::STEP_COMPLETED,
                &StepCompletedPayload {
                    workflow_id: payload.workflow_id,
                    step_name: payload.step_name,
                    output,
                },
            )?
        };
        self.bus.emit(envelope).await
    }
}

/// Compensation handler stub: reports success except for configured names.
struct StubCompensationHandler {
    bus: InMemoryEventBus,
    topics: Vec<String>,
    fail_compensations: HashSet<String>,
    invocations: Mutex<Vec<String>>,
}

#[async_trait]
impl EventHandler for StubCompensationHandler {
    fn subscriptions(&self) -> Vec<String> {
        self.topics.clone()
    }

    async fn handle(&self, event: EventEnvelope) -> event_bus::Result<()> {
        let payload: CompensationDispatchPayload = serde_json::from_value(event.data)?;
        self.invocations
            .lock()
            .unwrap()
            .push(payload.compensation_step.clone());

        let success = !self.fail_compensations.contains(&payload.compensation_step);
        self.bus
            .emit(topics::event(
                topics::COMPENSATION_COMPLETED,
                &CompensationCompletedPayload {
                    workflow_id: payload.workflow_id,
                    step_name: payload.original_step,
                    success,
                    error: (!success).then(|| "stub compensation failure".to_string()),
                },
            )?)
            .await
    }
}

struct Harness {
    bus: InMemoryEventBus,
    engine: Arc<Engine<InMemoryStateStore>>,
    steps: Arc<StubStepHandler>,
    compensations: Arc<StubCompensationHandler>,
}

impl Harness {
    fn new(fail_step: Option<&str>, fail_compensations: &[&str]) -> Self {
        let registry = Arc::new(WorkflowRegistry::new());
        registry.register(definition()).unwrap();

        let store = InMemoryStateStore::new();
        let bus = InMemoryEventBus::new();
        let bus_arc: Arc<dyn EventBus> = Arc::new(bus.clone());

        let engine = Arc::new(Engine::new(registry.clone(), store.clone(), bus_arc.clone()));
        let compensator = Arc::new(Compensator::new(store, bus_arc));

        bus.subscribe(Arc::new(EngineEventHandler::new(engine.clone())));
        bus.subscribe(Arc::new(CompensatorEventHandler::new(compensator)));

        let steps = Arc::new(StubStepHandler {
            bus: bus.clone(),
            topics: definition().steps.iter().map(|s| s.topic.clone()).collect(),
            fail_step: fail_step.map(String::from),
            invocations: Mutex::new(Vec::new()),
        });
        bus.subscribe(steps.clone());

        let compensations = Arc::new(StubCompensationHandler {
            bus: bus.clone(),
            topics: vec![
                topics::compensation_topic("CreditBack"),
                topics::compensation_topic("DebitBack"),
            ],
            fail_compensations: fail_compensations.iter().map(|s| s.to_string()).collect(),
            invocations: Mutex::new(Vec::new()),
        });
        bus.subscribe(compensations.clone());

        Self {
            bus,
            engine,
            steps,
            compensations,
        }
    }

    async fn start(&self, id: &str) -> WorkflowId {
        let workflow_id = WorkflowId::from_string(id);
        self.engine
            .start_workflow(StartWorkflow {
                workflow_type: WORKFLOW_TYPE.to_string(),
                input: Context::new(),
                workflow_id: Some(workflow_id.clone()),
            })
            .await
            .unwrap();
        self.bus.pump_until_idle().await;
        workflow_id
    }
}

#[tokio::test]
async fn test_happy_path_completes_all_steps() {
    let h = Harness::new(None, &[]);
    let id = h.start("wf-happy").await;

    let workflow = h.engine.store().get_workflow(&id).await.unwrap().unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert!(workflow.current_step.is_none());
    assert_eq!(workflow.context["DebitDone"], json!(true));
    assert_eq!(workflow.context["NotifyDone"], json!(true));

    assert_eq!(
        *h.steps.invocations.lock().unwrap(),
        vec!["Debit", "Credit", "Notify"]
    );

    let steps = h.engine.store().get_steps(&id).await.unwrap();
    assert_eq!(steps.len(), 3);
    assert!(steps.iter().all(|s| s.status == StepStatus::Completed));

    // Compensations registered for the two compensable steps, none executed.
    let compensations = h.engine.store().get_compensations(&id).await.unwrap();
    assert_eq!(compensations.len(), 2);
    assert!(compensations.iter().all(|c| !c.executed));
}

#[tokio::test]
async fn test_start_with_same_id_is_idempotent() {
    let h = Harness::new(None, &[]);
    let id = h.start("wf-idem").await;

    let before = h.steps.invocations.lock().unwrap().len();
    let existing = h
        .engine
        .start_workflow(StartWorkflow {
            workflow_type: WORKFLOW_TYPE.to_string(),
            input: Context::new(),
            workflow_id: Some(id.clone()),
        })
        .await
        .unwrap();
    h.bus.pump_until_idle().await;

    assert_eq!(existing.id, id);
    assert_eq!(existing.status, WorkflowStatus::Completed);
    // No second dispatch happened.
    assert_eq!(h.steps.invocations.lock().unwrap().len(), before);
}

#[tokio::test]
async fn test_unknown_type_is_rejected_synchronously() {
    let h = Harness::new(None, &[]);
    let result = h
        .engine
        .start_workflow(StartWorkflow {
            workflow_type: "nope".to_string(),
            input: Context::new(),
            workflow_id: None,
        })
        .await;
    assert!(matches!(
        result,
        Err(engine::EngineError::UnknownWorkflowType(t)) if t == "nope"
    ));
}

#[tokio::test]
async fn test_failure_on_first_step_compensates_nothing() {
    let h = Harness::new(Some("Debit"), &[]);
    let id = h.start("wf-first-fail").await;

    let workflow = h.engine.store().get_workflow(&id).await.unwrap().unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Compensated);
    assert_eq!(workflow.failed_step.as_deref(), Some("Debit"));
    assert_eq!(workflow.error.as_deref(), Some("stub failure"));

    assert!(h.compensations.invocations.lock().unwrap().is_empty());
    assert!(
        h.engine
            .store()
            .get_compensations(&id)
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_failure_mid_sequence_compensates_in_reverse_order() {
    let h = Harness::new(Some("Notify"), &[]);
    let id = h.start("wf-lifo").await;

    let workflow = h.engine.store().get_workflow(&id).await.unwrap().unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Compensated);

    // Credit registered after Debit, so it must roll back first.
    assert_eq!(
        *h.compensations.invocations.lock().unwrap(),
        vec!["DebitBack", "CreditBack"]
    );

    let steps = h.engine.store().get_steps(&id).await.unwrap();
    let debit = steps.iter().find(|s| s.step_name == "Debit").unwrap();
    let credit = steps.iter().find(|s| s.step_name == "Credit").unwrap();
    let notify = steps.iter().find(|s| s.step_name == "Notify").unwrap();
    assert_eq!(debit.status, StepStatus::Compensated);
    assert_eq!(credit.status, StepStatus::Compensated);
    assert_eq!(notify.status, StepStatus::Failed);
}

#[tokio::test]
async fn test_compensation_failure_does_not_stop_the_chain() {
    let h = Harness::new(Some("Notify"), &["DebitBack"]);
    let id = h.start("wf-comp-fail").await;

    let workflow = h.engine.store().get_workflow(&id).await.unwrap().unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Compensated);

    assert_eq!(
        *h.compensations.invocations.lock().unwrap(),
        vec!["DebitBack", "CreditBack"]
    );

    let compensations = h.engine.store().get_compensations(&id).await.unwrap();
    assert!(compensations.iter().all(|c| c.executed));
    let credit = compensations
        .iter()
        .find(|c| c.step_name == "Credit")
        .unwrap();
    assert_eq!(credit.result, Some(engine::CompensationResult::Failed));
    assert_eq!(credit.error.as_deref(), Some("stub compensation failure"));
}

#[tokio::test]
async fn test_replayed_execute_step_reuses_stored_outcome() {
    let h = Harness::new(None, &[]);
    let id = h.start("wf-replay").await;

    let invocations_before = h.steps.invocations.lock().unwrap().len();

    // Redeliver execute-step for an already-completed step.
    h.bus
        .emit(
            topics::event(
                topics::EXECUTE_STEP,
                &ExecuteStepPayload {
                    workflow_id: id.clone(),
                    step_name: "Debit".to_string(),
                },
            )
            .unwrap(),
        )
        .await
        .unwrap();
    h.bus.pump_until_idle().await;

    // The stored output was replayed instead of re-running the handler.
    assert_eq!(h.steps.invocations.lock().unwrap().len(), invocations_before);

    let workflow = h.engine.store().get_workflow(&id).await.unwrap().unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(
        h.engine
            .store()
            .get_compensations(&id)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_duplicate_step_completed_leaves_state_unchanged() {
    let h = Harness::new(None, &[]);
    let id = h.start("wf-dup").await;

    let mut output = Context::new();
    output.insert("DebitDone".to_string(), json!("tampered"));
    h.bus
        .emit(
            topics::event(
                topics::STEP_COMPLETED,
                &StepCompletedPayload {
                    workflow_id: id.clone(),
                    step_name: "Debit".to_string(),
                    output,
                },
            )
            .unwrap(),
        )
        .await
        .unwrap();
    h.bus.pump_until_idle().await;

    let workflow = h.engine.store().get_workflow(&id).await.unwrap().unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Completed);
    assert_eq!(workflow.context["DebitDone"], json!(true));

    let debit = h
        .engine
        .store()
        .get_step(&id, "Debit")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(debit.output.unwrap()["debitdone"], json!(true));
    assert_eq!(
        h.engine
            .store()
            .get_compensations(&id)
            .await
            .unwrap()
            .len(),
        2
    );
}

#[tokio::test]
async fn test_duplicate_compensation_completed_is_marked_once() {
    let h = Harness::new(Some("Notify"), &[]);
    let id = h.start("wf-dup-comp").await;

    let credit = h
        .engine
        .store()
        .get_compensation(&id, "Credit")
        .await
        .unwrap()
        .unwrap();
    let executed_at = credit.executed_at;

    h.bus
        .emit(
            topics::event(
                topics::COMPENSATION_COMPLETED,
                &CompensationCompletedPayload {
                    workflow_id: id.clone(),
                    step_name: "Credit".to_string(),
                    success: false,
                    error: Some("late duplicate".to_string()),
                },
            )
            .unwrap(),
        )
        .await
        .unwrap();
    h.bus.pump_until_idle().await;

    let credit = h
        .engine
        .store()
        .get_compensation(&id, "Credit")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(credit.executed_at, executed_at);
    assert_eq!(credit.result, Some(engine::CompensationResult::Success));
}

#[tokio::test]
async fn test_pause_and_resume_roundtrip() {
    // No subscribers for the step topics: the workflow stays on its first
    // step so it can be paused deterministically.
    let registry = Arc::new(WorkflowRegistry::new());
    registry.register(definition()).unwrap();
    let store = InMemoryStateStore::new();
    let bus = InMemoryEventBus::new();
    let bus_arc: Arc<dyn EventBus> = Arc::new(bus.clone());
    let engine = Arc::new(Engine::new(registry, store.clone(), bus_arc));
    bus.subscribe(Arc::new(EngineEventHandler::new(engine.clone())));

    let id = WorkflowId::from_string("wf-pause");
    engine
        .start_workflow(StartWorkflow {
            workflow_type: WORKFLOW_TYPE.to_string(),
            input: Context::new(),
            workflow_id: Some(id.clone()),
        })
        .await
        .unwrap();
    bus.pump_until_idle().await;

    engine
        .pause_workflow(&id, Some("manual-approval".to_string()))
        .await
        .unwrap();
    let workflow = engine.store().get_workflow(&id).await.unwrap().unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Waiting);
    assert_eq!(workflow.context["waitingFor"], json!("manual-approval"));
    assert_eq!(workflow.current_step.as_deref(), Some("Debit"));

    // Resume from a non-waiting status is a no-op; from waiting it merges
    // the signal and re-dispatches the current step.
    engine
        .resume_workflow(&id, "approved".to_string(), Some(json!({"approver": "ops"})))
        .await
        .unwrap();
    bus.pump_until_idle().await;

    let workflow = engine.store().get_workflow(&id).await.unwrap().unwrap();
    assert_eq!(workflow.status, WorkflowStatus::Running);
    assert_eq!(workflow.context["signal"], json!("approved"));
    assert_eq!(workflow.context["approver"], json!("ops"));

    // Second resume must warn and change nothing.
    engine
        .resume_workflow(&id, "approved-again".to_string(), None)
        .await
        .unwrap();
    let workflow = engine.store().get_workflow(&id).await.unwrap().unwrap();
    assert_eq!(workflow.context["signal"], json!("approved"));
}
