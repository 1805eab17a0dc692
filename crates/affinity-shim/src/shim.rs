use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use affinity_common::emotion::{affection_delta, classify, classify_for};
use affinity_common::validation::{
    clamp_affection, normalize_progress, validate_character_id, validate_memory, validate_username,
};
use affinity_common::{
    CharacterId, ChatEntry, ChatMessage, Emotion, Error, MemoryEntry, NewMemory, ProgressRecord,
    ProgressUpdate, RecordKind, Result, SweepRequest, UserId, UserProfile,
};
use affinity_config::AppConfig;
use affinity_db::SqliteKvStore;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::local::LocalStore;
use crate::remote::{HttpRemoteStore, RemoteStore};
use crate::status::RemoteStatus;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const DEFAULT_RECALL_LIMIT: usize = 20;

/// Which store served a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Remote,
    LocalOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stored<T> {
    pub value: T,
    pub source: Source,
}

impl<T> Stored<T> {
    fn remote(value: T) -> Self {
        Self {
            value,
            source: Source::Remote,
        }
    }

    fn local(value: T) -> Self {
        Self {
            value,
            source: Source::LocalOnly,
        }
    }

    pub fn is_local_only(&self) -> bool {
        self.source == Source::LocalOnly
    }
}

/// Result of recording one exchange with a character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub user_emotion: Emotion,
    pub character_emotion: Emotion,
    pub progress: ProgressRecord,
    pub source: Source,
}

/// User-scoped storage that prefers the remote store and degrades to local storage.
///
/// Validation failures are returned before any store is touched. Transient
/// remote failures are logged, flip the reachability flag, and the call is
/// served locally. Local failures are returned as-is.
pub struct PersistenceShim {
    remote: Option<Arc<dyn RemoteStore>>,
    local: LocalStore,
    status: RemoteStatus,
    // Offline ids already promoted to a remote account this session.
    promoted: Mutex<HashMap<UserId, UserId>>,
    pairing_window: chrono::Duration,
    history_limit: usize,
    recall_limit: usize,
}

impl PersistenceShim {
    pub fn new(remote: Arc<dyn RemoteStore>, local: LocalStore) -> Self {
        Self::build(Some(remote), local)
    }

    /// A shim that never attempts remote I/O.
    pub fn local_only(local: LocalStore) -> Self {
        Self::build(None, local)
    }

    fn build(remote: Option<Arc<dyn RemoteStore>>, local: LocalStore) -> Self {
        Self {
            remote,
            local,
            status: RemoteStatus::new(),
            promoted: Mutex::new(HashMap::new()),
            pairing_window: chrono::Duration::seconds(
                affinity_common::chat::DEFAULT_PAIRING_WINDOW_SECS as i64,
            ),
            history_limit: DEFAULT_HISTORY_LIMIT,
            recall_limit: DEFAULT_RECALL_LIMIT,
        }
    }

    pub fn with_pairing_window(mut self, window: chrono::Duration) -> Self {
        self.pairing_window = window;
        self
    }

    pub fn with_limits(mut self, history_limit: usize, recall_limit: usize) -> Self {
        self.history_limit = history_limit;
        self.recall_limit = recall_limit;
        self
    }

    /// Local store at `storage.local_path`, remote client when `remote.base_url` is set.
    pub fn from_config(config: &AppConfig, config_dir: &Path) -> Result<Self> {
        let kv = SqliteKvStore::open(&config.local_store_path(config_dir))?;
        let local = LocalStore::new(Arc::new(kv));

        let shim = match config.remote.base_url.as_deref() {
            Some(url) => {
                let remote = HttpRemoteStore::new(url, config.remote.timeout())?;
                info!("persistence shim using remote store at {url}");
                Self::new(Arc::new(remote), local)
            }
            None => {
                info!("no remote store configured, persistence shim is local-only");
                Self::local_only(local)
            }
        };

        Ok(shim
            .with_pairing_window(config.chat.pairing_window())
            .with_limits(config.chat.history_limit, config.memory.recall_limit))
    }

    pub fn status(&self) -> &RemoteStatus {
        &self.status
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    /// The remote store, if one is configured and not known to be down.
    fn remote(&self) -> Option<&Arc<dyn RemoteStore>> {
        self.remote
            .as_ref()
            .filter(|_| self.status.is_reachable())
    }

    /// The remote store for calls on behalf of `user_id`. Offline ids never reach it.
    fn remote_for(&self, user_id: UserId) -> Option<&Arc<dyn RemoteStore>> {
        self.remote().filter(|_| !user_id.is_local())
    }

    fn promoted(&self) -> Result<MutexGuard<'_, HashMap<UserId, UserId>>> {
        self.promoted
            .lock()
            .map_err(|_| Error::LocalStore("promoted id map lock poisoned".into()))
    }

    /// The id to use for `user_id` from here on.
    ///
    /// An offline id is promoted once the remote store is reachable again: the
    /// profile is logged in remotely and its local records move to the remote id.
    /// Until then, and for offline ids with no local profile, the id is kept and
    /// calls are served locally.
    async fn resolve_user(&self, op: &str, user_id: UserId) -> Result<UserId> {
        if !user_id.is_local() {
            return Ok(user_id);
        }
        if let Some(id) = self.promoted()?.get(&user_id).copied() {
            return Ok(id);
        }
        let Some(remote) = self.remote() else {
            return Ok(user_id);
        };

        match self.promote(remote.as_ref(), user_id).await {
            Ok(Some(id)) => Ok(id),
            Ok(None) => Ok(user_id),
            Err(err) => {
                self.absorb(op, err)?;
                Ok(user_id)
            }
        }
    }

    async fn promote(&self, remote: &dyn RemoteStore, local_id: UserId) -> Result<Option<UserId>> {
        let Some(offline) = self.local.profile_by_id(local_id)? else {
            debug!("no local profile for offline id {local_id}, serving it locally");
            return Ok(None);
        };

        let profile = self
            .remote_login(remote, &offline.username, offline.email.as_deref())
            .await?;
        self.adopt_offline(&profile)?;
        Ok(Some(profile.id))
    }

    /// Mirror a remote profile, carrying over records saved under an offline id
    /// for the same username.
    fn adopt_offline(&self, profile: &UserProfile) -> Result<()> {
        match self.local.find_profile(&profile.username)? {
            Some(offline) if offline.id.is_local() => {
                self.local.adopt_profile(offline.id, profile)?;
                self.promoted()?.insert(offline.id, profile.id);
                info!(
                    "offline profile {} for {} is now remote user {}",
                    offline.id, profile.username, profile.id
                );
                Ok(())
            }
            _ => self.local.save_profile(profile),
        }
    }

    /// Swallow a transient remote failure so the caller can fall back.
    fn absorb(&self, op: &str, err: Error) -> Result<()> {
        if err.is_transient() {
            warn!("{op}: remote store failed, falling back to local storage: {err}");
            self.status.mark_unreachable();
            Ok(())
        } else {
            Err(err)
        }
    }

    /// Keep the mirror best-effort once the remote write is durable.
    fn mirror(&self, op: &str, result: Result<()>) {
        if let Err(e) = result {
            warn!("{op}: failed to refresh local mirror: {e}");
        }
    }

    /// Re-probe the remote store. Returns whether it is reachable now.
    pub async fn reconnect(&self) -> bool {
        let Some(remote) = self.remote.as_ref() else {
            return false;
        };

        match remote.init().await {
            Ok(()) => {
                self.status.mark_reachable();
                true
            }
            Err(e) => {
                warn!("reconnect: remote store still unavailable: {e}");
                self.status.mark_unreachable();
                false
            }
        }
    }

    // --- profiles ---

    /// Find or create the profile for `username` and record the login.
    pub async fn login(&self, username: &str, email: Option<&str>) -> Result<Stored<UserProfile>> {
        validate_username(username)?;

        if let Some(remote) = self.remote() {
            match self.remote_login(remote.as_ref(), username, email).await {
                Ok(profile) => {
                    self.mirror("login", self.adopt_offline(&profile));
                    return Ok(Stored::remote(profile));
                }
                Err(err) => self.absorb("login", err)?,
            }
        }

        let now = Utc::now();
        let profile = match self.local.find_profile(username)? {
            Some(mut profile) => {
                profile.last_login_at = now;
                self.local.save_profile(&profile)?;
                profile
            }
            None => self.local.create_profile(username, email, now)?,
        };
        Ok(Stored::local(profile))
    }

    async fn remote_login(
        &self,
        remote: &dyn RemoteStore,
        username: &str,
        email: Option<&str>,
    ) -> Result<UserProfile> {
        let user_id = match remote.user_by_username(username).await? {
            Some(profile) => profile.id,
            None => {
                debug!("creating remote user {username}");
                remote.create_user(username, email).await?.id
            }
        };
        remote.record_login(user_id).await?;

        // Re-read so the login time is the one the remote store recorded.
        remote
            .user_by_username(username)
            .await?
            .ok_or_else(|| Error::NotFound(format!("user {username} disappeared after login")))
    }

    pub async fn profile(&self, username: &str) -> Result<Stored<Option<UserProfile>>> {
        validate_username(username)?;

        if let Some(remote) = self.remote() {
            match remote.user_by_username(username).await {
                Ok(profile) => {
                    if let Some(profile) = &profile {
                        self.mirror("load profile", self.adopt_offline(profile));
                    }
                    return Ok(Stored::remote(profile));
                }
                Err(err) => self.absorb("load profile", err)?,
            }
        }

        Ok(Stored::local(self.local.find_profile(username)?))
    }

    // --- progress ---

    /// Upsert progress for one character. Affection is clamped into `0..=100`.
    pub async fn save_progress(
        &self,
        user_id: UserId,
        character: &CharacterId,
        update: ProgressUpdate,
    ) -> Result<Stored<ProgressRecord>> {
        validate_character_id(character)?;
        let update = normalize_progress(update);

        let user_id = self.resolve_user("save progress", user_id).await?;

        if let Some(remote) = self.remote_for(user_id) {
            match remote.save_progress(user_id, character, &update).await {
                Ok(record) => {
                    self.mirror("save progress", self.local.set_progress(&record));
                    return Ok(Stored::remote(record));
                }
                Err(err) => self.absorb("save progress", err)?,
            }
        }

        let record = update.into_record(user_id, character.clone(), Utc::now());
        self.local.set_progress(&record)?;
        Ok(Stored::local(record))
    }

    pub async fn load_progress(
        &self,
        user_id: UserId,
        character: &CharacterId,
    ) -> Result<Stored<Option<ProgressRecord>>> {
        validate_character_id(character)?;

        let user_id = self.resolve_user("load progress", user_id).await?;

        if let Some(remote) = self.remote_for(user_id) {
            match remote.load_progress(user_id, character).await {
                Ok(record) => {
                    if let Some(record) = &record {
                        self.mirror("load progress", self.local.set_progress(record));
                    }
                    return Ok(Stored::remote(record));
                }
                Err(err) => self.absorb("load progress", err)?,
            }
        }

        Ok(Stored::local(self.local.progress(user_id, character)?))
    }

    pub async fn all_progress(&self, user_id: UserId) -> Result<Stored<Vec<ProgressRecord>>> {
        let user_id = self.resolve_user("load all progress", user_id).await?;

        if let Some(remote) = self.remote_for(user_id) {
            match remote.all_progress(user_id).await {
                Ok(records) => {
                    for record in &records {
                        self.mirror("load all progress", self.local.set_progress(record));
                    }
                    return Ok(Stored::remote(records));
                }
                Err(err) => self.absorb("load all progress", err)?,
            }
        }

        Ok(Stored::local(self.local.all_progress(user_id)?))
    }

    /// Apply an affection delta on top of the stored value and count the interaction.
    pub async fn adjust_affection(
        &self,
        user_id: UserId,
        character: &CharacterId,
        delta: i32,
        emotion: Emotion,
    ) -> Result<Stored<ProgressRecord>> {
        let previous = self.load_progress(user_id, character).await?.value;
        let update = match previous {
            Some(record) => ProgressUpdate {
                affection_level: clamp_affection(record.affection_level.saturating_add(delta)),
                current_emotion: emotion,
                nsfw_enabled: record.nsfw_enabled,
                total_interactions: record.total_interactions.saturating_add(1),
            },
            None => ProgressUpdate {
                affection_level: clamp_affection(delta),
                current_emotion: emotion,
                nsfw_enabled: false,
                total_interactions: 1,
            },
        };
        self.save_progress(user_id, character, update).await
    }

    pub async fn reset_progress(
        &self,
        user_id: UserId,
        character: &CharacterId,
    ) -> Result<Stored<ProgressRecord>> {
        self.save_progress(user_id, character, ProgressUpdate::default())
            .await
    }

    // --- chat ---

    /// Append one message, pairing it with the previous lone side when inside the window.
    pub async fn append_chat(
        &self,
        user_id: UserId,
        character: &CharacterId,
        message: &ChatMessage,
    ) -> Result<Stored<()>> {
        validate_character_id(character)?;
        let user_id = self.resolve_user("save chat message", user_id).await?;
        let entry = ChatEntry::from_message(user_id, character.clone(), message);

        if let Some(remote) = self.remote_for(user_id) {
            match remote.append_chat(user_id, character, message).await {
                Ok(()) => {
                    let mirrored = self.local.append_chat(entry, self.pairing_window);
                    self.mirror("save chat message", mirrored.map(|_| ()));
                    return Ok(Stored::remote(()));
                }
                Err(err) => self.absorb("save chat message", err)?,
            }
        }

        let outcome = self.local.append_chat(entry, self.pairing_window)?;
        debug!(user = %user_id, character = %character, "local chat append: {outcome:?}");
        Ok(Stored::local(()))
    }

    /// The most recent entries, oldest first.
    pub async fn chat_history(
        &self,
        user_id: UserId,
        character: &CharacterId,
    ) -> Result<Stored<Vec<ChatEntry>>> {
        validate_character_id(character)?;

        let user_id = self.resolve_user("load chat history", user_id).await?;

        if let Some(remote) = self.remote_for(user_id) {
            match remote.chat_history(user_id, character).await {
                Ok(entries) => {
                    self.mirror(
                        "load chat history",
                        self.local.replace_chat(user_id, character, &entries),
                    );
                    return Ok(Stored::remote(entries));
                }
                Err(err) => self.absorb("load chat history", err)?,
            }
        }

        let mut entries = self.local.chat_history(user_id, character)?;
        let skip = entries.len().saturating_sub(self.history_limit);
        entries.drain(..skip);
        Ok(Stored::local(entries))
    }

    /// Clear history in both stores.
    pub async fn clear_chat(&self, user_id: UserId, character: &CharacterId) -> Result<Stored<()>> {
        validate_character_id(character)?;

        let user_id = self.resolve_user("clear chat history", user_id).await?;

        let mut source = Source::LocalOnly;
        if let Some(remote) = self.remote_for(user_id) {
            match remote.clear_chat(user_id, character).await {
                Ok(()) => source = Source::Remote,
                Err(err) => self.absorb("clear chat history", err)?,
            }
        }

        self.local.clear_chat(user_id, character)?;
        Ok(Stored { value: (), source })
    }

    /// Classify both sides of an exchange, store it as one turn, and move affection.
    pub async fn record_turn(
        &self,
        user_id: UserId,
        character: &CharacterId,
        user_text: &str,
        response_text: &str,
    ) -> Result<TurnOutcome> {
        validate_character_id(character)?;

        let user_emotion = classify(user_text);
        let character_emotion = classify_for(response_text, character);
        let now = Utc::now();

        self.append_chat(
            user_id,
            character,
            &ChatMessage::user(user_text).with_emotion(user_emotion).at(now),
        )
        .await?;
        self.append_chat(
            user_id,
            character,
            &ChatMessage::character(response_text, character_emotion).at(now),
        )
        .await?;

        let delta = affection_delta(user_emotion, character_emotion);
        let progress = self
            .adjust_affection(user_id, character, delta, character_emotion)
            .await?;

        Ok(TurnOutcome {
            user_emotion,
            character_emotion,
            progress: progress.value,
            source: progress.source,
        })
    }

    // --- memories ---

    pub async fn save_memory(
        &self,
        user_id: UserId,
        character: &CharacterId,
        memory: &NewMemory,
    ) -> Result<Stored<MemoryEntry>> {
        validate_character_id(character)?;
        validate_memory(memory)?;

        let user_id = self.resolve_user("save memory", user_id).await?;

        if let Some(remote) = self.remote_for(user_id) {
            match remote.save_memory(user_id, character, memory).await {
                Ok(entry) => {
                    self.mirror("save memory", self.local.mirror_memory(&entry));
                    return Ok(Stored::remote(entry));
                }
                Err(err) => self.absorb("save memory", err)?,
            }
        }

        let entry = self
            .local
            .save_memory(user_id, character, memory, Utc::now())?;
        Ok(Stored::local(entry))
    }

    /// Memories ranked by importance then recency, limited to the recall limit.
    pub async fn memories(
        &self,
        user_id: UserId,
        character: &CharacterId,
    ) -> Result<Stored<Vec<MemoryEntry>>> {
        validate_character_id(character)?;

        let user_id = self.resolve_user("load memories", user_id).await?;

        if let Some(remote) = self.remote_for(user_id) {
            match remote.memories(user_id, character).await {
                Ok(memories) => {
                    self.mirror(
                        "load memories",
                        self.local.replace_memories(user_id, character, &memories),
                    );
                    return Ok(Stored::remote(memories));
                }
                Err(err) => self.absorb("load memories", err)?,
            }
        }

        let mut memories = self.local.memories(user_id, character)?;
        memories.truncate(self.recall_limit);
        Ok(Stored::local(memories))
    }

    /// Delete one memory from both stores. Returns whether it existed.
    pub async fn delete_memory(
        &self,
        user_id: UserId,
        character: &CharacterId,
        id: i64,
    ) -> Result<Stored<bool>> {
        validate_character_id(character)?;

        let user_id = self.resolve_user("delete memory", user_id).await?;

        if let Some(remote) = self.remote_for(user_id) {
            match remote.delete_memory(user_id, character, id).await {
                Ok(removed) => {
                    self.mirror(
                        "delete memory",
                        self.local.delete_memory(user_id, character, id).map(|_| ()),
                    );
                    return Ok(Stored::remote(removed));
                }
                Err(err) => self.absorb("delete memory", err)?,
            }
        }

        let removed = self.local.delete_memory(user_id, character, id)?;
        Ok(Stored::local(removed))
    }

    // --- retention ---

    /// Remove aged chat or memory entries for one user from the authoritative store.
    ///
    /// When the remote store serves the sweep, the local mirror is left to
    /// reconcile on the next read-through.
    pub async fn sweep(&self, user_id: UserId, request: &SweepRequest) -> Result<Stored<usize>> {
        if !matches!(request.kind, RecordKind::Chat | RecordKind::Memory) {
            return Err(Error::Validation(format!(
                "{} records cannot be swept",
                request.kind
            )));
        }

        let user_id = self.resolve_user("sweep", user_id).await?;

        if let Some(remote) = self.remote_for(user_id) {
            match remote.sweep(user_id, request).await {
                Ok(removed) => return Ok(Stored::remote(removed)),
                Err(err) => self.absorb("sweep", err)?,
            }
        }

        let removed = self.local.sweep(user_id, request, Utc::now())?;
        if removed > 0 {
            info!(user = %user_id, kind = %request.kind, "swept {removed} local entries");
        }
        Ok(Stored::local(removed))
    }
}
