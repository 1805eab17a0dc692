use affinity_common::validation::{validate_character_id, validate_memory, validate_username};
use affinity_common::wire::{
    CreateUserRequest, SaveChatRequest, SaveMemoryRequest, SaveProgressRequest, SuccessResponse,
    SweepBody, SweepResponse, UpdateMemoryRequest,
};
use affinity_common::{
    CharacterId, ChatEntry, ChatMessage, Error, NewMemory, SweepRequest, UserId,
};
use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::json;
use tracing::{debug, error};

use crate::state::SharedState;

fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Forbidden(_) => StatusCode::FORBIDDEN,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Conflict(_) => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: Error) -> Response {
    let status = status_for(&err);
    if status.is_server_error() {
        error!("request failed: {err}");
    } else {
        debug!("request rejected: {err}");
    }
    (status, Json(json!({ "error": err.to_string() }))).into_response()
}

fn respond<T: serde::Serialize>(result: affinity_common::Result<T>) -> Response {
    match result {
        Ok(value) => Json(value).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/init: create any missing tables.
pub async fn init(State(state): State<SharedState>) -> Response {
    respond(state.store.init().map(|()| SuccessResponse::ok()))
}

/// GET /api/users/:username
pub async fn get_user(State(state): State<SharedState>, Path(username): Path<String>) -> Response {
    match state.store.user_by_username(&username) {
        Ok(Some(profile)) => Json(profile).into_response(),
        Ok(None) => error_response(Error::NotFound("User not found".into())),
        Err(e) => error_response(e),
    }
}

/// POST /api/users
pub async fn create_user(
    State(state): State<SharedState>,
    Json(body): Json<CreateUserRequest>,
) -> Response {
    if let Err(e) = validate_username(&body.username) {
        return error_response(e);
    }
    match state.store.create_user(&body.username, body.email.as_deref()) {
        Ok(profile) => (StatusCode::CREATED, Json(profile)).into_response(),
        Err(e) => error_response(e),
    }
}

/// POST /api/users/:id/login
pub async fn record_login(State(state): State<SharedState>, Path(user_id): Path<UserId>) -> Response {
    match state.store.record_login(user_id) {
        Ok(true) => Json(SuccessResponse::ok()).into_response(),
        Ok(false) => error_response(Error::NotFound(format!("user {user_id}"))),
        Err(e) => error_response(e),
    }
}

/// POST /api/progress: upsert; affection is clamped by the store.
pub async fn save_progress(
    State(state): State<SharedState>,
    Json(body): Json<SaveProgressRequest>,
) -> Response {
    let character = CharacterId::new(body.character);
    if let Err(e) = validate_character_id(&character) {
        return error_response(e);
    }
    respond(state.store.save_progress(body.user_id, &character, &body.progress))
}

/// GET /api/progress/:userId/:character: `null` when nothing is saved yet.
pub async fn load_progress(
    State(state): State<SharedState>,
    Path((user_id, character)): Path<(UserId, String)>,
) -> Response {
    respond(
        state
            .store
            .load_progress(user_id, &CharacterId::new(character)),
    )
}

/// GET /api/progress/:userId
pub async fn all_progress(State(state): State<SharedState>, Path(user_id): Path<UserId>) -> Response {
    respond(state.store.all_progress(user_id))
}

/// POST /api/chat: append one side of a turn, pairing with the previous lone side.
pub async fn save_chat(
    State(state): State<SharedState>,
    Json(body): Json<SaveChatRequest>,
) -> Response {
    let character = CharacterId::new(body.character);
    if let Err(e) = validate_character_id(&character) {
        return error_response(e);
    }
    let Some(user_id) = body.user_id else {
        return error_response(Error::Forbidden("Unauthorized".into()));
    };

    let message = ChatMessage {
        text: body.message,
        is_user: body.is_user,
        emotion: body.emotion.unwrap_or_default(),
        timestamp: body.timestamp.unwrap_or_else(Utc::now),
    };
    let entry = ChatEntry::from_message(user_id, character, &message);

    match state
        .store
        .append_chat(entry, state.config.chat.pairing_window())
    {
        Ok(outcome) => {
            debug!(user = %user_id, "chat append: {outcome:?}");
            Json(SuccessResponse::ok()).into_response()
        }
        Err(e) => error_response(e),
    }
}

/// GET /api/chat/:userId/:character: most recent entries, oldest first.
pub async fn chat_history(
    State(state): State<SharedState>,
    Path((user_id, character)): Path<(UserId, String)>,
) -> Response {
    respond(state.store.chat_history(
        user_id,
        &CharacterId::new(character),
        state.config.chat.history_limit,
    ))
}

/// DELETE /api/chat/:userId/:character
pub async fn clear_chat(
    State(state): State<SharedState>,
    Path((user_id, character)): Path<(UserId, String)>,
) -> Response {
    respond(
        state
            .store
            .delete_chat(user_id, &CharacterId::new(character))
            .map(|removed| SuccessResponse {
                success: true,
                removed: Some(removed),
            }),
    )
}

/// POST /api/memory
pub async fn save_memory(
    State(state): State<SharedState>,
    Json(body): Json<SaveMemoryRequest>,
) -> Response {
    let character = CharacterId::new(body.character);
    let mut memory = NewMemory::general(body.memory);
    if let Some(memory_type) = body.memory_type {
        memory = memory.with_type(memory_type);
    }
    if let Some(importance) = body.importance_score {
        memory = memory.with_importance(importance);
    }

    if let Err(e) = validate_character_id(&character).and_then(|()| validate_memory(&memory)) {
        return error_response(e);
    }
    respond(state.store.save_memory(body.user_id, &character, &memory))
}

/// GET /api/memory/:userId/:character: ranked by importance, then recency.
pub async fn memories(
    State(state): State<SharedState>,
    Path((user_id, character)): Path<(UserId, String)>,
) -> Response {
    respond(state.store.memories(
        user_id,
        &CharacterId::new(character),
        state.config.memory.recall_limit,
    ))
}

/// PUT /api/memory/:userId/:character/:id
pub async fn update_memory(
    State(state): State<SharedState>,
    Path((user_id, character, id)): Path<(UserId, String, i64)>,
    Json(body): Json<UpdateMemoryRequest>,
) -> Response {
    let check = NewMemory::general(body.memory_content.as_str()).with_importance(body.importance_score);
    if let Err(e) = validate_memory(&check) {
        return error_response(e);
    }

    match state.store.update_memory(
        user_id,
        &CharacterId::new(character),
        id,
        &body.memory_content,
        body.importance_score,
    ) {
        Ok(Some(entry)) => Json(entry).into_response(),
        Ok(None) => error_response(Error::NotFound(format!("memory {id}"))),
        Err(e) => error_response(e),
    }
}

/// DELETE /api/memory/:userId/:character/:id
pub async fn delete_memory(
    State(state): State<SharedState>,
    Path((user_id, character, id)): Path<(UserId, String, i64)>,
) -> Response {
    respond(
        state
            .store
            .delete_memory(user_id, &CharacterId::new(character), id)
            .map(|deleted| SuccessResponse {
                success: true,
                removed: Some(usize::from(deleted)),
            }),
    )
}

/// POST /api/sweep: per-user retention for chat or memory.
pub async fn sweep(State(state): State<SharedState>, Json(body): Json<SweepBody>) -> Response {
    let request = SweepRequest {
        kind: body.kind,
        older_than_secs: body.older_than_secs,
        min_importance: body.min_importance,
    };
    respond(
        state
            .store
            .sweep(body.user_id, &request, Utc::now())
            .map(|removed| SweepResponse { removed }),
    )
}

#[cfg(test)]
mod tests {
    use super::status_for;
    use affinity_common::Error;
    use axum::http::StatusCode;

    #[test]
    fn error_kinds_map_to_statuses() {
        assert_eq!(status_for(&Error::Validation("x".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&Error::Forbidden("x".into())), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&Error::NotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&Error::Conflict("x".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&Error::Database("locked".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
