use crate::{
    conversation::{
        conversation_dto::{ConversationListResponse, OpenConversationRequest},
        conversation_handlers, Conversation,
    },
    message::{message_dto::SendMessageRequest, message_handlers, ImageRef, Message},
    state::AppState,
    websocket::{
        self,
        handler::{ParticipantPresence, PresenceResponse},
    },
};
use axum::{
    routing::{get, patch, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::time::Duration;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        conversation_handlers::open_conversation,
        conversation_handlers::get_conversation,
        conversation_handlers::list_participant_conversations,
        message_handlers::send_message,
        message_handlers::list_messages,
        message_handlers::mark_message_seen,
        message_handlers::conversation_stream,
        websocket::handler::presence,
        websocket::handler::participant_presence,
    ),
    components(
        schemas(
            OpenConversationRequest,
            ConversationListResponse,
            Conversation,
            SendMessageRequest,
            Message,
            ImageRef,
            PresenceResponse,
            ParticipantPresence,
        )
    ),
    tags(
        (name = "conversations", description = "Buyer/seller conversation endpoints"),
        (name = "messages", description = "Message endpoints"),
        (name = "presence", description = "Live session endpoints")
    )
)]
struct ApiDoc;

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let conversation_routes = Router::new()
        .route("/", post(conversation_handlers::open_conversation))
        .route("/:id", get(conversation_handlers::get_conversation))
        .route("/:id/messages", get(message_handlers::list_messages))
        .route("/:id/stream", get(message_handlers::conversation_stream));

    let message_routes = Router::new()
        .route("/", post(message_handlers::send_message))
        .route("/:id/seen", patch(message_handlers::mark_message_seen));

    let participant_routes = Router::new().route(
        "/:participant_id/conversations",
        get(conversation_handlers::list_participant_conversations),
    );

    // Combine all routes
    let api_routes = Router::new()
        .nest("/conversations", conversation_routes)
        .nest("/messages", message_routes)
        .nest("/participants", participant_routes)
        .route("/presence", get(websocket::presence))
        .route("/presence/:participant", get(websocket::participant_presence));

    let timeout = Duration::from_secs(state.config.request_timeout_secs);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api", api_routes)
        .route("/ws", get(websocket::ws_handler))
        .route("/health", get(health))
        .layer(TimeoutLayer::new(timeout))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Config;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use futures::StreamExt;
    use std::{sync::Arc, time::Duration};
    use tower::ServiceExt;

    fn app() -> Router {
        create_router(AppState::in_memory(Arc::new(Config::default())))
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn open(app: &Router, buyer_id: &str, seller_id: &str) -> (StatusCode, Value) {
        call(
            app,
            "POST",
            "/api/conversations",
            Some(json!({ "buyer_id": buyer_id, "seller_id": seller_id })),
        )
        .await
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (status, body) = call(&app(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn opening_twice_returns_the_same_conversation() {
        let app = app();

        let (status, first) = open(&app, "buyer-1", "shop-1").await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, second) = open(&app, "buyer-1", "shop-1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["id"], second["id"]);

        let (status, _) = open(&app, "buyer-1", "buyer-1").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn message_lifecycle_over_http() {
        let app = app();
        let (_, conversation) = open(&app, "buyer-1", "shop-1").await;
        let conversation_id = conversation["id"].as_str().unwrap().to_string();

        for (sender, text) in [("buyer-1", "A"), ("shop-1", "B"), ("buyer-1", "C")] {
            let (status, message) = call(
                &app,
                "POST",
                "/api/messages",
                Some(json!({ "conversation_id": conversation_id, "sender": sender, "text": text })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(message["seen"], false);
        }

        let uri = format!("/api/conversations/{}/messages", conversation_id);
        let (status, messages) = call(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let texts: Vec<&str> = messages
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["text"].as_str().unwrap())
            .collect();
        assert_eq!(texts, vec!["A", "B", "C"]);

        let first_id = messages[0]["id"].as_str().unwrap();
        let uri = format!("/api/messages/{}/seen", first_id);
        let (status, seen) = call(&app, "PATCH", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(seen["seen"], true);
        let (status, seen_again) = call(&app, "PATCH", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(seen_again["seen"], true);

        let uri = format!("/api/conversations/{}", conversation_id);
        let (_, conversation) = call(&app, "GET", &uri, None).await;
        assert_eq!(conversation["last_message"], "C");

        let (status, listing) =
            call(&app, "GET", "/api/participants/shop-1/conversations", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listing["conversations"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn errors_map_to_status_codes() {
        let app = app();
        let (_, conversation) = open(&app, "buyer-1", "shop-1").await;
        let conversation_id = conversation["id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            "POST",
            "/api/messages",
            Some(json!({ "conversation_id": conversation_id, "sender": "buyer-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = call(
            &app,
            "POST",
            "/api/messages",
            Some(json!({ "conversation_id": uuid::Uuid::new_v4(), "sender": "buyer-1", "text": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = call(
            &app,
            "POST",
            "/api/messages",
            Some(json!({ "conversation_id": conversation_id, "sender": "stranger", "text": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let uri = format!("/api/messages/{}/seen", uuid::Uuid::new_v4());
        let (status, _) = call(&app, "PATCH", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let uri = format!("/api/conversations/{}/messages", uuid::Uuid::new_v4());
        let (status, _) = call(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn empty_conversation_lists_as_empty_array() {
        let app = app();
        let (_, conversation) = open(&app, "buyer-1", "shop-1").await;
        let uri = format!(
            "/api/conversations/{}/messages",
            conversation["id"].as_str().unwrap()
        );

        let (status, messages) = call(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(messages, json!([]));
    }

    #[tokio::test]
    async fn presence_starts_empty() {
        let (status, body) = call(&app(), "GET", "/api/presence", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["online"], json!([]));

        let (status, body) = call(&app(), "GET", "/api/presence/buyer-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "participant": "buyer-1", "online": false }));
    }

    #[tokio::test]
    async fn openapi_document_is_served() {
        let (status, body) = call(&app(), "GET", "/api-docs/openapi.json", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/api/messages"].is_object());
    }

    #[tokio::test]
    async fn malformed_ids_are_json_bad_requests() {
        let app = app();

        let (status, body) = call(
            &app,
            "POST",
            "/api/messages",
            Some(json!({ "conversation_id": "abc", "sender": "buyer-1", "text": "hi" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("conversation_id"));

        let (status, body) = call(
            &app,
            "POST",
            "/api/conversations",
            Some(json!({ "buyer_id": 7, "seller_id": "shop-1" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, body) = call(&app, "GET", "/api/conversations/abc/messages", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn stream_of_unknown_conversation_is_not_found() {
        let uri = format!("/api/conversations/{}/stream", uuid::Uuid::new_v4());
        let (status, body) = call(&app(), "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Conversation not found");
    }

    #[tokio::test]
    async fn stream_delivers_sent_messages() {
        let app = app();
        let (_, conversation) = open(&app, "buyer-1", "shop-1").await;
        let conversation_id = conversation["id"].as_str().unwrap().to_string();

        let request = Request::builder()
            .uri(format!("/api/conversations/{}/stream", conversation_id))
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "text/event-stream");

        let (status, _) = call(
            &app,
            "POST",
            "/api/messages",
            Some(json!({ "conversation_id": conversation_id, "sender": "shop-1", "text": "ships monday" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let mut body = response.into_body().into_data_stream();
        let mut received = String::new();
        while !received.contains("\n\n") {
            let chunk = tokio::time::timeout(Duration::from_secs(1), body.next())
                .await
                .expect("no event within a second")
                .expect("stream ended")
                .unwrap();
            received.push_str(std::str::from_utf8(&chunk).unwrap());
        }

        assert!(received.contains("event: message_created"));
        assert!(received.contains("ships monday"));
    }
}
