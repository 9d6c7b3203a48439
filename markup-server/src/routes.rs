//! HTTP route handlers.

use axum::extract::{Form, Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use markup::core::types::Run;
use markup::io::slack::{InteractionPayload, SlackEnvelope};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::sse;
use crate::state::AppState;

/// Full application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api", api_router())
        .route("/slack/events", post(slack_events))
        .route("/slack/actions", post(slack_actions))
        .route("/events", get(sse::events_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Read-only run API.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/runs", get(list_runs))
        .route("/runs/{run_id}", get(get_run))
        .route("/threads/{thread_key}", get(get_thread))
}

async fn health() -> &'static str {
    "ok"
}

/// GET /api/runs - every run, newest first.
async fn list_runs(State(state): State<AppState>) -> Json<Vec<Run>> {
    Json(state.store.runs())
}

/// GET /api/runs/{run_id}
async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<Run>, StatusCode> {
    state
        .store
        .get_run_by_id(&run_id)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// GET /api/threads/{thread_key} - run for a `channel:thread_ts` key.
async fn get_thread(
    State(state): State<AppState>,
    Path(thread_key): Path<String>,
) -> Result<Json<Run>, StatusCode> {
    state
        .store
        .get_run_by_thread(&thread_key)
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// POST /slack/events - Events API callbacks.
///
/// Acknowledges immediately; the event is handled on its own task. Slack
/// redeliveries are acknowledged and dropped so one mention never starts two
/// runs.
async fn slack_events(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(envelope): Json<SlackEnvelope>,
) -> Response {
    if let Some(retry) = headers.get("x-slack-retry-num") {
        debug!(retry = ?retry, "ignoring slack redelivery");
        return StatusCode::OK.into_response();
    }
    match envelope {
        SlackEnvelope::UrlVerification { challenge } => {
            Json(json!({ "challenge": challenge })).into_response()
        }
        SlackEnvelope::EventCallback { event } => {
            match event.into_chat_event() {
                Some(chat_event) => {
                    info!(thread_key = %chat_event.thread_key(), "mention received");
                    state.events.dispatch(chat_event);
                }
                None => debug!("ignoring unsupported slack event"),
            }
            StatusCode::OK.into_response()
        }
        SlackEnvelope::Other => StatusCode::OK.into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ActionForm {
    payload: String,
}

/// POST /slack/actions - interactive button presses (form-encoded `payload`).
async fn slack_actions(State(state): State<AppState>, Form(form): Form<ActionForm>) -> StatusCode {
    let payload: InteractionPayload = match serde_json::from_str(&form.payload) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "malformed slack interaction payload");
            return StatusCode::BAD_REQUEST;
        }
    };
    for event in payload.into_chat_events() {
        info!(thread_key = %event.thread_key(), "button pressed");
        state.events.dispatch(event);
    }
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use markup::core::types::RunStatus;
    use markup::io::chat::{ActionKind, ChatEvent};
    use markup::io::run_store::RunStore;
    use serde_json::Value;
    use tokio::sync::broadcast;
    use tower::ServiceExt;

    use super::*;
    use crate::state::EventSink;

    #[derive(Default)]
    struct RecordingSink {
        events: Mutex<Vec<ChatEvent>>,
    }

    impl RecordingSink {
        fn events(&self) -> Vec<ChatEvent> {
            self.events.lock().expect("lock").clone()
        }
    }

    impl EventSink for RecordingSink {
        fn dispatch(&self, event: ChatEvent) {
            self.events.lock().expect("lock").push(event);
        }
    }

    fn setup() -> (Router, Arc<RunStore>, Arc<RecordingSink>) {
        let (tx, _) = broadcast::channel(16);
        let store = Arc::new(RunStore::with_changes(tx.clone()));
        let sink = Arc::new(RecordingSink::default());
        let state = AppState::new(Arc::clone(&store), sink.clone(), tx);
        (app(state), store, sink)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    fn json_request(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (app, _, _) = setup();
        let response = app
            .oneshot(Request::get("/api/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn runs_are_served_by_id_and_thread() {
        let (app, store, _) = setup();
        store
            .create_run("ab12cd34", "C1:1.0", "C1", "make the navbar blue")
            .expect("create");

        let response = app
            .clone()
            .oneshot(Request::get("/api/runs/ab12cd34").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let run = body_json(response).await;
        assert_eq!(run["status"], "PLANNING");
        assert_eq!(run["thread_key"], "C1:1.0");

        let response = app
            .clone()
            .oneshot(Request::get("/api/threads/C1:1.0").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(body_json(response).await["run_id"], "ab12cd34");

        let response = app
            .clone()
            .oneshot(Request::get("/api/runs/missing").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app
            .oneshot(Request::get("/api/runs").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(body_json(response).await.as_array().map(Vec::len), Some(1));
        assert_eq!(store.get_run_by_id("ab12cd34").map(|r| r.status), Some(RunStatus::Planning));
    }

    #[tokio::test]
    async fn url_verification_echoes_challenge() {
        let (app, _, sink) = setup();
        let response = app
            .oneshot(json_request(
                "/slack/events",
                r#"{"type":"url_verification","token":"t","challenge":"abc123"}"#,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["challenge"], "abc123");
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn app_mention_is_dispatched() {
        let (app, _, sink) = setup();
        let response = app
            .oneshot(json_request(
                "/slack/events",
                r#"{"type":"event_callback","event":{"type":"app_mention","channel":"C1",
                    "user":"U1","text":"<@UBOT> make the navbar blue","ts":"1.0"}}"#,
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            sink.events(),
            vec![ChatEvent::Mention {
                channel: "C1".to_string(),
                thread_ts: "1.0".to_string(),
                user: "U1".to_string(),
                text: "make the navbar blue".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn slack_retries_are_acknowledged_without_dispatch() {
        let (app, _, sink) = setup();
        let mut request = json_request(
            "/slack/events",
            r#"{"type":"event_callback","event":{"type":"app_mention","channel":"C1","text":"hi","ts":"1.0"}}"#,
        );
        request
            .headers_mut()
            .insert("x-slack-retry-num", "1".parse().expect("header"));
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(sink.events().is_empty());
    }

    #[tokio::test]
    async fn button_press_is_dispatched_as_action() {
        let (app, _, sink) = setup();
        let payload = r#"{"type":"block_actions","user":{"id":"U1"},"channel":{"id":"C1"},"container":{"message_ts":"2.0","thread_ts":"1.0"},"actions":[{"action_id":"revise","value":"ab12cd34"}]}"#;
        let body = format!("payload={}", form_encode(payload));
        let request = Request::post("/slack/actions")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            sink.events(),
            vec![ChatEvent::Action {
                kind: ActionKind::Revise,
                run_id: "ab12cd34".to_string(),
                channel: "C1".to_string(),
                thread_ts: "1.0".to_string(),
                user: "U1".to_string(),
            }]
        );
    }

    #[tokio::test]
    async fn malformed_action_payload_is_rejected() {
        let (app, _, sink) = setup();
        let request = Request::post("/slack/actions")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("payload=not-json"))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(sink.events().is_empty());
    }

    fn form_encode(raw: &str) -> String {
        raw.bytes()
            .map(|b| match b {
                b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                    (b as char).to_string()
                }
                _ => format!("%{b:02X}"),
            })
            .collect()
    }
}
