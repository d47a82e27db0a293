//! Intake HTTP API.
//!
//! | Method | Path                    | Body                 | Response                      |
//! |--------|-------------------------|----------------------|-------------------------------|
//! | POST   | `/api/v1/board`         | `{"url": ...}`       | 201 + board JSON              |
//! | POST   | `/api/v1/board/exists`  | `{"path": "/u/b/"}`  | 200 `{"exists", "path"}`      |
//! | POST   | `/api/v1/board/count`   | `{"path": "/u/b/"}`  | 200 `{"count"}`               |
//!
//! Failures answer 400 with `{"error": message}`.

mod handlers;

use axum::Router;
use axum::routing::post;

use crate::services::IntakeService;

/// Build the intake router.
pub fn router(intake: IntakeService) -> Router {
    Router::new()
        .route("/api/v1/board", post(handlers::enqueue_board))
        .route("/api/v1/board/exists", post(handlers::exists_board))
        .route("/api/v1/board/count", post(handlers::count_board))
        .with_state(intake)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode, header};
    use futures::StreamExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use crate::broker::{BoardIndex, Broker, MemoryBroker};
    use crate::models::Board;

    fn app(broker: &Arc<MemoryBroker>) -> Router {
        router(IntakeService::new(broker.clone(), broker.clone(), "boards"))
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn enqueue_board_returns_created() {
        let broker = Arc::new(MemoryBroker::new());
        let mut sub = broker.subscribe("boards").await.unwrap();

        let response = app(&broker)
            .oneshot(post_json(
                "/api/v1/board",
                r#"{"url":"https://example.com/alice/travel/"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        let body = json_body(response).await;
        assert_eq!(body["host"], "example.com");
        assert_eq!(body["user"], "alice");
        assert_eq!(body["path"], "travel");
        assert_eq!(body["pathsegments"], json!(["travel"]));
        assert!(uuid::Uuid::parse_str(body["uuid"].as_str().unwrap()).is_ok());

        let published: Board = serde_json::from_slice(&sub.next().await.unwrap()).unwrap();
        assert_eq!(published.id, body["uuid"]);
    }

    #[tokio::test]
    async fn enqueue_board_rejects_invalid_url() {
        let broker = Arc::new(MemoryBroker::new());

        let response = app(&broker)
            .oneshot(post_json("/api/v1/board", r#"{"url":"https://example.com/"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().starts_with("Parse user failed"));
    }

    #[tokio::test]
    async fn malformed_json_is_bad_request() {
        let broker = Arc::new(MemoryBroker::new());

        let response = app(&broker)
            .oneshot(post_json("/api/v1/board", "{not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "EnqueueBoard failed: Can't decode JSON request");
    }

    #[tokio::test]
    async fn publish_failure_is_bad_request() {
        let broker = Arc::new(MemoryBroker::new());
        broker.close();

        let response = app(&broker)
            .oneshot(post_json(
                "/api/v1/board",
                r#"{"url":"https://example.com/alice/travel/"}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn exists_and_count() {
        let broker = Arc::new(MemoryBroker::new());
        broker.add_member("alice:travel", "1.jpg").await.unwrap();
        broker.add_member("alice:travel", "2.jpg").await.unwrap();

        let response = app(&broker)
            .oneshot(post_json("/api/v1/board/exists", r#"{"path":"/alice/travel/"}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            json_body(response).await,
            json!({"exists": true, "path": "/alice/travel/"})
        );

        let response = app(&broker)
            .oneshot(post_json("/api/v1/board/count", r#"{"path":"/alice/travel/"}"#))
            .await
            .unwrap();
        assert_eq!(json_body(response).await, json!({"count": 2}));

        let response = app(&broker)
            .oneshot(post_json("/api/v1/board/count", r#"{"path":""}"#))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
