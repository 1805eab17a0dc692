use axum::Router;
use axum::routing::{get, post, put};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::state::SharedState;

/// Build the main application router with all routes.
pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/init", post(api::init))
        .route("/api/users", post(api::create_user))
        .route("/api/users/{user}", get(api::get_user))
        .route("/api/users/{user}/login", post(api::record_login))
        .route("/api/progress", post(api::save_progress))
        .route("/api/progress/{user_id}", get(api::all_progress))
        .route("/api/progress/{user_id}/{character}", get(api::load_progress))
        .route("/api/chat", post(api::save_chat))
        .route(
            "/api/chat/{user_id}/{character}",
            get(api::chat_history).delete(api::clear_chat),
        )
        .route("/api/memory", post(api::save_memory))
        .route("/api/memory/{user_id}/{character}", get(api::memories))
        .route(
            "/api/memory/{user_id}/{character}/{id}",
            put(api::update_memory).delete(api::delete_memory),
        )
        .route("/api/sweep", post(api::sweep))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
mod tests {
    use super::build_router;
    use crate::state::AppState;
    use affinity_config::AppConfig;
    use affinity_db::RecordStore;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> axum::Router {
        let store = RecordStore::in_memory().expect("store");
        build_router(Arc::new(AppState::new(AppConfig::default(), store)))
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    async fn body_json(resp: axum::response::Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn health_is_ok() {
        let resp = app()
            .oneshot(Request::get("/health").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn chat_rejects_long_character_and_missing_user() {
        let app = app();

        let resp = app
            .clone()
            .oneshot(post_json(
                "/api/chat",
                json!({"userId": 1, "character": "x".repeat(51), "message": "hi", "isUser": true}),
            ))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .oneshot(post_json(
                "/api/chat",
                json!({"character": "morty", "message": "hi", "isUser": true}),
            ))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(body_json(resp).await["error"], "forbidden: Unauthorized");
    }

    #[tokio::test]
    async fn unknown_user_is_404_and_duplicate_is_409() {
        let app = app();

        let resp = app
            .clone()
            .oneshot(Request::get("/api/users/ghost").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let create = || post_json("/api/users", json!({"username": "rick137"}));
        let first = app.clone().oneshot(create()).await.expect("response");
        assert_eq!(first.status(), StatusCode::CREATED);
        assert_eq!(body_json(first).await["id"], 1);

        let second = app.oneshot(create()).await.expect("response");
        assert_eq!(second.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn progress_is_clamped_and_missing_progress_is_null() {
        let app = app();
        app.clone()
            .oneshot(post_json("/api/users", json!({"username": "rick137"})))
            .await
            .expect("user");

        let resp = app
            .clone()
            .oneshot(Request::get("/api/progress/1/morty").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, Value::Null);

        let resp = app
            .oneshot(post_json(
                "/api/progress",
                json!({"userId": 1, "character": "morty", "progress": {"affectionLevel": 150}}),
            ))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await["affectionLevel"], 100);
    }

    #[tokio::test]
    async fn memory_for_unknown_user_is_rejected() {
        let resp = app()
            .oneshot(post_json(
                "/api/memory",
                json!({"userId": 99, "character": "rick", "memory": "owes money"}),
            ))
            .await
            .expect("response");
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
