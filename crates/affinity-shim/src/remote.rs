use std::time::Duration;

use affinity_common::wire::{
    CreateUserRequest, ErrorResponse, SaveChatRequest, SaveMemoryRequest, SaveProgressRequest,
    SuccessResponse, SweepBody, SweepResponse,
};
use affinity_common::{
    CharacterId, ChatEntry, ChatMessage, Error, MemoryEntry, NewMemory, ProgressRecord,
    ProgressUpdate, Result, SweepRequest, UserId, UserProfile,
};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;

/// Transport to the network-accessible record store.
///
/// Implementations do not retry. Failures come back as `Error::TransientStore`
/// (unreachable, timeout, 5xx) or `Error::Validation` (4xx); the shim decides
/// what to do with them.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn init(&self) -> Result<()>;

    async fn user_by_username(&self, username: &str) -> Result<Option<UserProfile>>;
    async fn create_user(&self, username: &str, email: Option<&str>) -> Result<UserProfile>;
    async fn record_login(&self, user_id: UserId) -> Result<()>;

    async fn save_progress(
        &self,
        user_id: UserId,
        character: &CharacterId,
        update: &ProgressUpdate,
    ) -> Result<ProgressRecord>;
    async fn load_progress(
        &self,
        user_id: UserId,
        character: &CharacterId,
    ) -> Result<Option<ProgressRecord>>;
    async fn all_progress(&self, user_id: UserId) -> Result<Vec<ProgressRecord>>;

    async fn append_chat(
        &self,
        user_id: UserId,
        character: &CharacterId,
        message: &ChatMessage,
    ) -> Result<()>;
    async fn chat_history(&self, user_id: UserId, character: &CharacterId)
    -> Result<Vec<ChatEntry>>;
    async fn clear_chat(&self, user_id: UserId, character: &CharacterId) -> Result<()>;

    async fn save_memory(
        &self,
        user_id: UserId,
        character: &CharacterId,
        memory: &NewMemory,
    ) -> Result<MemoryEntry>;
    async fn memories(&self, user_id: UserId, character: &CharacterId)
    -> Result<Vec<MemoryEntry>>;
    /// Returns whether the entry existed.
    async fn delete_memory(&self, user_id: UserId, character: &CharacterId, id: i64)
    -> Result<bool>;

    async fn sweep(&self, user_id: UserId, request: &SweepRequest) -> Result<usize>;
}

/// JSON-over-HTTP client for the Affinity API.
pub struct HttpRemoteStore {
    http: Client,
    base_url: Url,
}

impl HttpRemoteStore {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::Config(format!("invalid remote base url {base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(Error::Config(format!(
                "remote base url {base_url} cannot carry a path"
            )));
        }

        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build http client: {e}")))?;

        Ok(Self { http, base_url })
    }

    /// `GET {base}/health`. Succeeds when the server answers with a success status.
    pub async fn health(&self) -> Result<()> {
        let url = self.url(["health"])?;
        self.send(self.http.get(url), "health check").await?;
        Ok(())
    }

    /// Build `{base}/{segments...}` with each segment percent-encoded.
    fn url<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("remote base url {} cannot carry a path", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        self.url(std::iter::once("api").chain(segments.iter().copied()))
    }

    async fn send(&self, request: reqwest::RequestBuilder, context: &str) -> Result<Response> {
        let resp = request
            .send()
            .await
            .map_err(|e| Error::TransientStore(format!("{context}: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }

        let body = resp.text().await.unwrap_or_default();
        Err(status_error(status, context, &body))
    }

    async fn decode<T: DeserializeOwned>(resp: Response, context: &str) -> Result<T> {
        resp.json::<T>()
            .await
            .map_err(|e| Error::TransientStore(format!("{context}: malformed response: {e}")))
    }
}

/// 4xx is the caller's fault and is not retried; everything else is transient.
fn status_error(status: StatusCode, context: &str, body: &str) -> Error {
    let detail = serde_json::from_str::<ErrorResponse>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| body.trim().to_string());

    if status.is_client_error() {
        Error::Validation(format!("{context} rejected with status {status}: {detail}"))
    } else {
        Error::TransientStore(format!("{context} failed with status {status}: {detail}"))
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn init(&self) -> Result<()> {
        let url = self.endpoint(&["init"])?;
        self.send(self.http.post(url), "init remote store").await?;
        Ok(())
    }

    async fn user_by_username(&self, username: &str) -> Result<Option<UserProfile>> {
        let context = "load user";
        let url = self.endpoint(&["users", username])?;
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::TransientStore(format!("{context}: {e}")))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Self::decode(resp, context).await.map(Some),
            status => {
                let body = resp.text().await.unwrap_or_default();
                Err(status_error(status, context, &body))
            }
        }
    }

    async fn create_user(&self, username: &str, email: Option<&str>) -> Result<UserProfile> {
        let context = "create user";
        let url = self.endpoint(&["users"])?;
        let body = CreateUserRequest {
            username: username.to_string(),
            email: email.map(str::to_string),
        };
        let resp = self.send(self.http.post(url).json(&body), context).await?;
        Self::decode(resp, context).await
    }

    async fn record_login(&self, user_id: UserId) -> Result<()> {
        let url = self.endpoint(&["users", &user_id.to_string(), "login"])?;
        self.send(self.http.post(url), "record login").await?;
        Ok(())
    }

    async fn save_progress(
        &self,
        user_id: UserId,
        character: &CharacterId,
        update: &ProgressUpdate,
    ) -> Result<ProgressRecord> {
        let context = "save progress";
        let url = self.endpoint(&["progress"])?;
        let body = SaveProgressRequest {
            user_id,
            character: character.to_string(),
            progress: update.clone(),
        };
        let resp = self.send(self.http.post(url).json(&body), context).await?;
        Self::decode(resp, context).await
    }

    async fn load_progress(
        &self,
        user_id: UserId,
        character: &CharacterId,
    ) -> Result<Option<ProgressRecord>> {
        let context = "load progress";
        let url = self.endpoint(&["progress", &user_id.to_string(), character.as_str()])?;
        let resp = self.send(self.http.get(url), context).await?;
        Self::decode(resp, context).await
    }

    async fn all_progress(&self, user_id: UserId) -> Result<Vec<ProgressRecord>> {
        let context = "load all progress";
        let url = self.endpoint(&["progress", &user_id.to_string()])?;
        let resp = self.send(self.http.get(url), context).await?;
        Self::decode(resp, context).await
    }

    async fn append_chat(
        &self,
        user_id: UserId,
        character: &CharacterId,
        message: &ChatMessage,
    ) -> Result<()> {
        let url = self.endpoint(&["chat"])?;
        let body = SaveChatRequest {
            user_id: Some(user_id),
            character: character.to_string(),
            message: message.text.clone(),
            is_user: message.is_user,
            emotion: Some(message.emotion),
            timestamp: Some(message.timestamp),
        };
        self.send(self.http.post(url).json(&body), "save chat message")
            .await?;
        Ok(())
    }

    async fn chat_history(
        &self,
        user_id: UserId,
        character: &CharacterId,
    ) -> Result<Vec<ChatEntry>> {
        let context = "load chat history";
        let url = self.endpoint(&["chat", &user_id.to_string(), character.as_str()])?;
        let resp = self.send(self.http.get(url), context).await?;
        Self::decode(resp, context).await
    }

    async fn clear_chat(&self, user_id: UserId, character: &CharacterId) -> Result<()> {
        let url = self.endpoint(&["chat", &user_id.to_string(), character.as_str()])?;
        self.send(self.http.delete(url), "clear chat history").await?;
        Ok(())
    }

    async fn save_memory(
        &self,
        user_id: UserId,
        character: &CharacterId,
        memory: &NewMemory,
    ) -> Result<MemoryEntry> {
        let context = "save memory";
        let url = self.endpoint(&["memory"])?;
        let body = SaveMemoryRequest {
            user_id,
            character: character.to_string(),
            memory: memory.memory_content.clone(),
            memory_type: Some(memory.memory_type.clone()),
            importance_score: Some(memory.importance_score),
        };
        let resp = self.send(self.http.post(url).json(&body), context).await?;
        Self::decode(resp, context).await
    }

    async fn memories(&self, user_id: UserId, character: &CharacterId) -> Result<Vec<MemoryEntry>> {
        let context = "load memories";
        let url = self.endpoint(&["memory", &user_id.to_string(), character.as_str()])?;
        let resp = self.send(self.http.get(url), context).await?;
        Self::decode(resp, context).await
    }

    async fn delete_memory(&self, user_id: UserId, character: &CharacterId, id: i64) -> Result<bool> {
        let context = "delete memory";
        let url = self.endpoint(&[
            "memory",
            &user_id.to_string(),
            character.as_str(),
            &id.to_string(),
        ])?;
        let resp = self.send(self.http.delete(url), context).await?;
        let deleted: SuccessResponse = Self::decode(resp, context).await?;
        Ok(deleted.removed.unwrap_or(0) > 0)
    }

    async fn sweep(&self, user_id: UserId, request: &SweepRequest) -> Result<usize> {
        let context = "sweep";
        let url = self.endpoint(&["sweep"])?;
        let body = SweepBody {
            user_id,
            kind: request.kind,
            older_than_secs: request.older_than_secs,
            min_importance: request.min_importance,
        };
        let resp = self.send(self.http.post(url).json(&body), context).await?;
        let swept: SweepResponse = Self::decode(resp, context).await?;
        Ok(swept.removed)
    }
}

#[cfg(test)]
mod tests {
    use super::{HttpRemoteStore, RemoteStore};
    use affinity_common::{CharacterId, ChatMessage, Error, ProgressUpdate, UserId};
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpRemoteStore {
        HttpRemoteStore::new(&server.uri(), Duration::from_millis(500)).expect("client")
    }

    fn profile_json() -> serde_json::Value {
        json!({
            "id": 1,
            "username": "rick137",
            "email": null,
            "createdAt": "2024-05-01T12:00:00Z",
            "lastLoginAt": "2024-05-01T12:00:00Z"
        })
    }

    #[tokio::test]
    async fn user_lookup_maps_404_to_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users/ghost"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error": "User not found"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/users/rick137"))
            .respond_with(ResponseTemplate::new(200).set_body_json(profile_json()))
            .mount(&server)
            .await;

        let remote = client(&server);
        assert!(remote.user_by_username("ghost").await.expect("lookup").is_none());
        let user = remote
            .user_by_username("rick137")
            .await
            .expect("lookup")
            .expect("user should exist");
        assert_eq!(user.id, UserId::new(1));
    }

    #[tokio::test]
    async fn health_probes_outside_the_api_prefix() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).health().await.expect("healthy");

        let down = HttpRemoteStore::new("http://127.0.0.1:9", Duration::from_millis(500))
            .expect("client");
        assert!(down.health().await.unwrap_err().is_transient());
    }

    #[tokio::test]
    async fn path_segments_are_percent_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/users/evil%20morty"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let remote = client(&server);
        assert!(remote.user_by_username("evil morty").await.expect("lookup").is_none());
    }

    #[tokio::test]
    async fn save_progress_sends_wire_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/progress"))
            .and(body_partial_json(json!({
                "userId": 1,
                "character": "morty",
                "progress": {"affectionLevel": 100, "currentEmotion": "happy"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "userId": 1,
                "characterId": "morty",
                "affectionLevel": 100,
                "currentEmotion": "happy",
                "nsfwEnabled": false,
                "totalInteractions": 4,
                "updatedAt": "2024-05-01T12:00:00Z"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let record = client(&server)
            .save_progress(
                UserId::new(1),
                &CharacterId::from("morty"),
                &ProgressUpdate {
                    affection_level: 100,
                    current_emotion: affinity_common::Emotion::Happy,
                    nsfw_enabled: false,
                    total_interactions: 4,
                },
            )
            .await
            .expect("save progress");
        assert_eq!(record.total_interactions, 4);
    }

    #[tokio::test]
    async fn server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "Failed to save chat"})))
            .mount(&server)
            .await;

        let err = client(&server)
            .append_chat(UserId::new(1), &CharacterId::from("rick"), &ChatMessage::user("hi"))
            .await
            .unwrap_err();
        assert!(err.is_transient(), "got {err:?}");
        assert!(err.to_string().contains("Failed to save chat"));
    }

    #[tokio::test]
    async fn client_errors_are_validation_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({"error": "character id too long"})))
            .mount(&server)
            .await;

        let err = client(&server)
            .append_chat(UserId::new(1), &CharacterId::from("rick"), &ChatMessage::user("hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn slow_responses_time_out_as_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/progress/1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!([]))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let remote = HttpRemoteStore::new(&server.uri(), Duration::from_millis(100)).expect("client");
        let err = remote.all_progress(UserId::new(1)).await.unwrap_err();
        assert!(err.is_transient(), "got {err:?}");
    }

    #[tokio::test]
    async fn connection_refused_is_transient() {
        let remote =
            HttpRemoteStore::new("http://127.0.0.1:9", Duration::from_millis(200)).expect("client");
        let err = remote.init().await.unwrap_err();
        assert!(err.is_transient(), "got {err:?}");
    }

    #[tokio::test]
    async fn malformed_body_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/memory/1/rick"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy error</html>"))
            .mount(&server)
            .await;

        let err = client(&server)
            .memories(UserId::new(1), &CharacterId::from("rick"))
            .await
            .unwrap_err();
        assert!(err.is_transient(), "got {err:?}");
    }

    #[test]
    fn rejects_non_http_base_url() {
        assert!(HttpRemoteStore::new("mailto:rick@citadel", Duration::from_secs(1)).is_err());
        assert!(HttpRemoteStore::new("not a url", Duration::from_secs(1)).is_err());
    }
}
