//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::http::{Request, StatusCode};
use event_bus::InMemoryEventBus;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use state_store::InMemoryStateStore;
use tower::ServiceExt;

use api::routes::workflows::AppState;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> (
    axum::Router,
    Arc<AppState<InMemoryStateStore>>,
    InMemoryEventBus,
) {
    let (state, bus) = api::create_default_state();
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state, bus)
}

async fn body_json(response: axum::response::Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn start_request(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/workflows/start")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn order_input(amount: f64, quantity: u32, weight: f64) -> Value {
    json!({
        "amount": amount,
        "items": [{"sku": "SKU-001", "quantity": quantity}],
        "weight": weight,
        "userId": "user-1",
    })
}

#[tokio::test]
async fn test_health_check() {
    let (app, _, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["store"], "reachable");
}

#[tokio::test]
async fn test_start_workflow() {
    let (app, _, bus) = setup();

    let response = app
        .oneshot(start_request(json!({
            "type": "order-fulfillment",
            "input": order_input(120.0, 2, 12.5),
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let json = body_json(response).await;
    assert_eq!(json["type"], "order-fulfillment");
    assert_eq!(json["status"], "running");
    assert!(json["workflowId"].as_str().unwrap().starts_with("wf_"));

    bus.pump_until_idle().await;
}

#[tokio::test]
async fn test_start_unknown_type_is_rejected() {
    let (app, _, _) = setup();

    let response = app
        .oneshot(start_request(json!({"type": "no-such-workflow"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(
        json["error"]
            .as_str()
            .unwrap()
            .contains("Unknown workflow type")
    );
}

#[tokio::test]
async fn test_start_and_get_completed_workflow() {
    let (app, _, bus) = setup();

    let response = app
        .clone()
        .oneshot(start_request(json!({
            "type": "order-fulfillment",
            "input": order_input(120.0, 2, 12.5),
            "workflow_id": "wf-api-happy",
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    bus.pump_until_idle().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/workflows/wf-api-happy")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["workflow"]["status"], "completed");
    assert!(json["workflow"]["currentStep"].is_null());
    assert_eq!(json["steps"].as_array().unwrap().len(), 6);
    assert_eq!(json["compensations"].as_array().unwrap().len(), 3);

    // Steps come back in execution order.
    assert_eq!(json["steps"][0]["stepName"], "ValidateOrder");
    assert_eq!(json["steps"][5]["stepName"], "Complete");
}

#[tokio::test]
async fn test_get_unknown_workflow_is_404() {
    let (app, _, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/workflows/wf-missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_workflow_history_shows_compensation() {
    let (app, _, bus) = setup();

    // weight >= 50 fails the shipment step after payment and inventory.
    let response = app
        .clone()
        .oneshot(start_request(json!({
            "type": "order-fulfillment",
            "input": order_input(120.0, 2, 50.0),
            "workflow_id": "wf-api-comp",
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    bus.pump_until_idle().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/workflows/wf-api-comp")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let json = body_json(response).await;

    assert_eq!(json["workflow"]["status"], "compensated");
    assert_eq!(json["workflow"]["failedStep"], "CreateShipment");

    let compensations = json["compensations"].as_array().unwrap();
    assert_eq!(compensations.len(), 2);
    assert!(compensations.iter().all(|c| c["executed"] == json!(true)));
}

#[tokio::test]
async fn test_list_workflows_newest_first() {
    let (app, _, bus) = setup();

    for id in ["wf-list-1", "wf-list-2"] {
        let response = app
            .clone()
            .oneshot(start_request(json!({
                "type": "order-fulfillment",
                "input": order_input(120.0, 2, 12.5),
                "workflow_id": id,
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        bus.pump_until_idle().await;
    }

    let response = app
        .oneshot(
            Request::builder()
                .uri("/workflows")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["count"], 2);
    let workflows = json["workflows"].as_array().unwrap();
    assert_eq!(workflows[0]["id"], "wf-list-2");
    assert_eq!(workflows[1]["id"], "wf-list-1");
}

#[tokio::test]
async fn test_signal_unknown_workflow_is_404() {
    let (app, _, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/workflows/wf-missing/signal")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_string(&json!({"signal": "approved"})).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_signal_running_workflow_is_accepted_but_noop() {
    let (app, state, bus) = setup();

    let response = app
        .clone()
        .oneshot(start_request(json!({
            "type": "order-fulfillment",
            "input": order_input(120.0, 2, 12.5),
            "workflow_id": "wf-api-signal",
        })))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    bus.pump_until_idle().await;

    // Workflow already completed; resume is a warned no-op.
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/workflows/wf-api-signal/signal")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::to_string(&json!({"signal": "approved"})).unwrap(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    bus.pump_until_idle().await;

    let workflow = state
        .engine
        .store()
        .get_workflow(&common::WorkflowId::from_string("wf-api-signal"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(workflow.status, engine::WorkflowStatus::Completed);
    assert!(!workflow.context.contains_key("signal"));
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
