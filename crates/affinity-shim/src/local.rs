use std::sync::{Arc, Mutex, MutexGuard};

use affinity_common::chat::AppendOutcome;
use affinity_common::{
    CharacterId, ChatEntry, Error, MemoryEntry, NewMemory, ProgressRecord, RecordKind, Result,
    SweepRequest, UserId, UserProfile, append_paired, rank_memories,
};
use affinity_db::KeyValueStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

/// On-device mirror and fallback, laid out as `{kind}:{userId}:{key}` over a key-value primitive.
///
/// Chat and memory are stored as one JSON list per `(user, character)`.
pub struct LocalStore {
    kv: Arc<dyn KeyValueStore>,
    // Serializes read-modify-write of list blobs.
    edit_lock: Mutex<()>,
}

fn record_key(kind: RecordKind, user_id: UserId, key: &str) -> String {
    format!("{kind}:{user_id}:{key}")
}

impl LocalStore {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self {
            kv,
            edit_lock: Mutex::new(()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, ()>> {
        self.edit_lock
            .lock()
            .map_err(|_| Error::LocalStore("local store edit lock poisoned".into()))
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv.get(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| Error::LocalStore(format!("corrupt local value at {key}: {e}"))),
            None => Ok(None),
        }
    }

    fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| Error::LocalStore(format!("failed to serialize {key}: {e}")))?;
        self.kv.set(key, &raw)
    }

    // --- profiles ---

    pub fn profile_by_id(&self, user_id: UserId) -> Result<Option<UserProfile>> {
        let prefix = format!("{}:{user_id}:", RecordKind::Profile);
        match self.kv.keys_with_prefix(&prefix)?.first() {
            Some(key) => self.read(key),
            None => Ok(None),
        }
    }

    pub fn find_profile(&self, username: &str) -> Result<Option<UserProfile>> {
        for key in self.kv.keys_with_prefix(&format!("{}:", RecordKind::Profile))? {
            if key.splitn(3, ':').nth(2) == Some(username) {
                return self.read(&key);
            }
        }
        Ok(None)
    }

    /// Create an offline profile. Local ids count down from -1 so they can never
    /// collide with an id the remote store assigned.
    pub fn create_profile(
        &self,
        username: &str,
        email: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<UserProfile> {
        let _guard = self.lock()?;

        let next_id = self
            .kv
            .keys_with_prefix(&format!("{}:", RecordKind::Profile))?
            .iter()
            .filter_map(|key| key.splitn(3, ':').nth(1)?.parse::<i64>().ok())
            .filter(|id| *id < 0)
            .min()
            .unwrap_or(0)
            .saturating_sub(1);

        let profile = UserProfile {
            id: UserId::new(next_id),
            username: username.to_string(),
            email: email.map(str::to_string),
            created_at: now,
            last_login_at: now,
        };
        self.write(&record_key(RecordKind::Profile, profile.id, username), &profile)?;
        debug!("created local profile {} for {username}", profile.id);
        Ok(profile)
    }

    /// Store a profile, dropping any local copy of the same username under another id.
    pub fn save_profile(&self, profile: &UserProfile) -> Result<()> {
        let _guard = self.lock()?;
        self.store_profile(profile)
    }

    /// Move everything saved under the offline id `local_id` to `profile.id`, then
    /// store `profile` in place of the offline profile.
    ///
    /// Records already present under the remote id came from the remote store and
    /// are kept; the offline copy of the same record is dropped.
    pub fn adopt_profile(&self, local_id: UserId, profile: &UserProfile) -> Result<usize> {
        let _guard = self.lock()?;
        let to = profile.id;

        let mut moved = self.move_user(RecordKind::Progress, local_id, to, |r: &mut ProgressRecord| {
            r.user_id = to;
        })?;
        moved += self.move_user(RecordKind::Chat, local_id, to, |entries: &mut Vec<ChatEntry>| {
            entries.iter_mut().for_each(|e| e.user_id = to);
        })?;
        moved += self.move_user(RecordKind::Memory, local_id, to, |memories: &mut Vec<MemoryEntry>| {
            memories.iter_mut().for_each(|m| m.user_id = to);
        })?;

        self.kv
            .delete(&record_key(RecordKind::Profile, local_id, &profile.username))?;
        self.store_profile(profile)?;
        debug!("moved {moved} local records from {local_id} to {to}");
        Ok(moved)
    }

    fn move_user<T>(
        &self,
        kind: RecordKind,
        from: UserId,
        to: UserId,
        retag: impl Fn(&mut T),
    ) -> Result<usize>
    where
        T: Serialize + DeserializeOwned,
    {
        let prefix = format!("{kind}:{from}:");
        let mut moved = 0;
        for key in self.kv.keys_with_prefix(&prefix)? {
            let target = record_key(kind, to, &key[prefix.len()..]);
            if self.kv.get(&target)?.is_none() {
                if let Some(mut value) = self.read::<T>(&key)? {
                    retag(&mut value);
                    self.write(&target, &value)?;
                    moved += 1;
                }
            }
            self.kv.delete(&key)?;
        }
        Ok(moved)
    }

    fn store_profile(&self, profile: &UserProfile) -> Result<()> {
        if let Some(existing) = self.find_profile(&profile.username)? {
            if existing.id != profile.id {
                self.kv
                    .delete(&record_key(RecordKind::Profile, existing.id, &existing.username))?;
            }
        }
        self.write(
            &record_key(RecordKind::Profile, profile.id, &profile.username),
            profile,
        )
    }

    // --- progress ---

    pub fn progress(&self, user_id: UserId, character: &CharacterId) -> Result<Option<ProgressRecord>> {
        self.read(&record_key(RecordKind::Progress, user_id, character.as_str()))
    }

    pub fn set_progress(&self, record: &ProgressRecord) -> Result<()> {
        self.write(
            &record_key(
                RecordKind::Progress,
                record.user_id,
                record.character_id.as_str(),
            ),
            record,
        )
    }

    pub fn all_progress(&self, user_id: UserId) -> Result<Vec<ProgressRecord>> {
        let prefix = format!("{}:{user_id}:", RecordKind::Progress);
        let mut records = Vec::new();
        for key in self.kv.keys_with_prefix(&prefix)? {
            if let Some(record) = self.read(&key)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    // --- chat ---

    pub fn chat_history(&self, user_id: UserId, character: &CharacterId) -> Result<Vec<ChatEntry>> {
        Ok(self
            .read(&record_key(RecordKind::Chat, user_id, character.as_str()))?
            .unwrap_or_default())
    }

    pub fn replace_chat(
        &self,
        user_id: UserId,
        character: &CharacterId,
        entries: &[ChatEntry],
    ) -> Result<()> {
        let _guard = self.lock()?;
        self.write(&record_key(RecordKind::Chat, user_id, character.as_str()), entries)
    }

    pub fn append_chat(&self, entry: ChatEntry, window: chrono::Duration) -> Result<AppendOutcome> {
        let _guard = self.lock()?;
        let key = record_key(RecordKind::Chat, entry.user_id, entry.character_id.as_str());
        let mut history: Vec<ChatEntry> = self.read(&key)?.unwrap_or_default();
        let outcome = append_paired(&mut history, entry, window);
        self.write(&key, &history)?;
        Ok(outcome)
    }

    pub fn clear_chat(&self, user_id: UserId, character: &CharacterId) -> Result<bool> {
        let _guard = self.lock()?;
        self.kv
            .delete(&record_key(RecordKind::Chat, user_id, character.as_str()))
    }

    // --- memories ---

    /// Memories ranked by importance, then recency.
    pub fn memories(&self, user_id: UserId, character: &CharacterId) -> Result<Vec<MemoryEntry>> {
        let mut memories: Vec<MemoryEntry> = self
            .read(&record_key(RecordKind::Memory, user_id, character.as_str()))?
            .unwrap_or_default();
        rank_memories(&mut memories);
        Ok(memories)
    }

    pub fn replace_memories(
        &self,
        user_id: UserId,
        character: &CharacterId,
        memories: &[MemoryEntry],
    ) -> Result<()> {
        let _guard = self.lock()?;
        self.write(&record_key(RecordKind::Memory, user_id, character.as_str()), memories)
    }

    pub fn save_memory(
        &self,
        user_id: UserId,
        character: &CharacterId,
        memory: &NewMemory,
        now: DateTime<Utc>,
    ) -> Result<MemoryEntry> {
        let _guard = self.lock()?;
        let key = record_key(RecordKind::Memory, user_id, character.as_str());
        let mut memories: Vec<MemoryEntry> = self.read(&key)?.unwrap_or_default();

        let id = memories
            .iter()
            .map(|m| m.id)
            .max()
            .unwrap_or(0)
            .saturating_add(1);
        let entry = MemoryEntry {
            id,
            user_id,
            character_id: character.clone(),
            memory_type: memory.memory_type.clone(),
            memory_content: memory.memory_content.clone(),
            importance_score: memory.importance_score,
            created_at: now,
            updated_at: now,
        };
        memories.push(entry.clone());
        self.write(&key, &memories)?;
        Ok(entry)
    }

    /// Insert or replace a memory by id, keeping the id the remote store assigned.
    pub fn mirror_memory(&self, entry: &MemoryEntry) -> Result<()> {
        let _guard = self.lock()?;
        let key = record_key(RecordKind::Memory, entry.user_id, entry.character_id.as_str());
        let mut memories: Vec<MemoryEntry> = self.read(&key)?.unwrap_or_default();
        match memories.iter_mut().find(|m| m.id == entry.id) {
            Some(existing) => *existing = entry.clone(),
            None => memories.push(entry.clone()),
        }
        self.write(&key, &memories)
    }

    pub fn delete_memory(&self, user_id: UserId, character: &CharacterId, id: i64) -> Result<bool> {
        let _guard = self.lock()?;
        let key = record_key(RecordKind::Memory, user_id, character.as_str());
        let mut memories: Vec<MemoryEntry> = self.read(&key)?.unwrap_or_default();
        let before = memories.len();
        memories.retain(|m| m.id != id);
        if memories.len() == before {
            return Ok(false);
        }
        self.write(&key, &memories)?;
        Ok(true)
    }

    // --- retention ---

    /// Drop aged entries of one kind across every character of `user_id`.
    pub fn sweep(&self, user_id: UserId, request: &SweepRequest, now: DateTime<Utc>) -> Result<usize> {
        if !matches!(request.kind, RecordKind::Chat | RecordKind::Memory) {
            return Err(Error::Validation(format!(
                "{} records cannot be swept",
                request.kind
            )));
        }

        let cutoff = request.cutoff(now);
        let _guard = self.lock()?;
        let prefix = format!("{}:{user_id}:", request.kind);
        let mut removed = 0;

        for key in self.kv.keys_with_prefix(&prefix)? {
            removed += match request.kind {
                RecordKind::Chat => {
                    self.sweep_list::<ChatEntry>(&key, |e| e.timestamp < cutoff)?
                }
                RecordKind::Memory => {
                    let min = request.min_importance.unwrap_or(u32::MAX);
                    self.sweep_list::<MemoryEntry>(&key, |m| {
                        m.created_at < cutoff && m.importance_score < min
                    })?
                }
                RecordKind::Profile | RecordKind::Progress => 0,
            };
        }
        Ok(removed)
    }

    fn sweep_list<T>(&self, key: &str, expired: impl Fn(&T) -> bool) -> Result<usize>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut items: Vec<T> = self.read(key)?.unwrap_or_default();
        let before = items.len();
        items.retain(|item| !expired(item));
        let removed = before - items.len();
        if removed > 0 {
            self.write(key, &items)?;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::LocalStore;
    use affinity_common::{
        AppendOutcome, CharacterId, ChatEntry, ChatMessage, Emotion, Error, NewMemory,
        ProgressUpdate, RecordKind, SweepRequest, UserId,
    };
    use affinity_db::{KeyValueStore, MemoryKvStore};
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::Arc;

    fn store() -> (Arc<MemoryKvStore>, LocalStore) {
        let kv = Arc::new(MemoryKvStore::new());
        (kv.clone(), LocalStore::new(kv))
    }

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn keys_follow_kind_user_key_scheme() {
        let (kv, local) = store();
        let morty = CharacterId::from("morty");
        let record = ProgressUpdate::default().into_record(UserId::new(4), morty.clone(), t0());
        local.set_progress(&record).expect("set progress");
        local
            .append_chat(
                ChatEntry::from_message(UserId::new(4), morty.clone(), &ChatMessage::user("hi").at(t0())),
                Duration::minutes(5),
            )
            .expect("append");
        local
            .save_memory(UserId::new(4), &morty, &NewMemory::general("owes rick"), t0())
            .expect("memory");
        local.create_profile("rick137", None, t0()).expect("profile");

        let mut keys = kv.keys_with_prefix("").expect("scan");
        keys.sort();
        assert_eq!(
            keys,
            vec!["chat:4:morty", "memory:4:morty", "profile:-1:rick137", "progress:4:morty"]
        );
    }

    #[test]
    fn progress_round_trips_timestamps_exactly() {
        let (_, local) = store();
        let ts = Utc.timestamp_nanos(1_717_234_200_123_456_789);
        let record = ProgressUpdate {
            affection_level: 64,
            current_emotion: Emotion::Excited,
            nsfw_enabled: true,
            total_interactions: 9,
        }
        .into_record(UserId::new(2), CharacterId::from("summer"), ts);

        local.set_progress(&record).expect("set");
        let loaded = local
            .progress(UserId::new(2), &CharacterId::from("summer"))
            .expect("get")
            .expect("present");
        assert_eq!(loaded, record);
    }

    #[test]
    fn all_progress_does_not_leak_other_users() {
        let (_, local) = store();
        for (user, character) in [(1, "rick"), (1, "morty"), (11, "rick")] {
            let record = ProgressUpdate::default().into_record(
                UserId::new(user),
                CharacterId::from(character),
                t0(),
            );
            local.set_progress(&record).expect("set");
        }

        let mine = local.all_progress(UserId::new(1)).expect("list");
        assert_eq!(mine.len(), 2);
        assert!(mine.iter().all(|r| r.user_id == UserId::new(1)));
    }

    #[test]
    fn offline_profile_ids_count_down_from_minus_one() {
        let (_, local) = store();
        let rick = local.create_profile("rick137", None, t0()).expect("create");
        let mut remote = rick.clone();
        remote.username = "summer".into();
        remote.id = UserId::new(7);
        local.save_profile(&remote).expect("mirror remote profile");
        let morty = local
            .create_profile("morty", Some("morty@smith.com"), t0())
            .expect("create");
        assert_eq!(rick.id, UserId::new(-1));
        assert_eq!(morty.id, UserId::new(-2));
        assert!(rick.id.is_local() && !remote.id.is_local());
        assert_eq!(
            local.find_profile("morty").expect("find").map(|p| p.id),
            Some(UserId::new(-2))
        );
        assert_eq!(
            local.profile_by_id(UserId::new(-2)).expect("by id"),
            Some(morty)
        );
        assert!(local.profile_by_id(UserId::new(-3)).expect("by id").is_none());
        assert!(local.find_profile("jerry").expect("find").is_none());
    }

    #[test]
    fn saving_remote_profile_replaces_local_alias() {
        let (kv, local) = store();
        let mut offline = local.create_profile("rick137", None, t0()).expect("create");
        offline.id = UserId::new(42);
        local.save_profile(&offline).expect("save");

        assert_eq!(kv.keys_with_prefix("profile:").expect("scan"), vec!["profile:42:rick137"]);
    }

    #[test]
    fn adopting_a_profile_rekeys_offline_records() {
        let (kv, local) = store();
        let offline = local.create_profile("summer", None, t0()).expect("create");
        let morty = CharacterId::from("morty");
        let rick = CharacterId::from("rick");

        let record = ProgressUpdate::default().into_record(offline.id, morty.clone(), t0());
        local.set_progress(&record).expect("progress");
        local
            .append_chat(
                ChatEntry::from_message(offline.id, morty.clone(), &ChatMessage::user("hi").at(t0())),
                Duration::minutes(5),
            )
            .expect("chat");
        local
            .save_memory(offline.id, &morty, &NewMemory::general("likes summer"), t0())
            .expect("memory");

        // A record the remote store already mirrored under the remote id wins.
        let remote_id = UserId::new(2);
        let mirrored = ProgressUpdate {
            affection_level: 30,
            ..ProgressUpdate::default()
        }
        .into_record(remote_id, rick.clone(), t0());
        local.set_progress(&mirrored).expect("mirror");
        local
            .set_progress(&ProgressUpdate::default().into_record(offline.id, rick.clone(), t0()))
            .expect("offline duplicate");

        let mut remote = offline.clone();
        remote.id = remote_id;
        assert_eq!(local.adopt_profile(offline.id, &remote).expect("adopt"), 3);

        let mut keys = kv.keys_with_prefix("").expect("scan");
        keys.sort();
        assert_eq!(
            keys,
            vec![
                "chat:2:morty",
                "memory:2:morty",
                "profile:2:summer",
                "progress:2:morty",
                "progress:2:rick"
            ]
        );
        assert_eq!(
            local.progress(remote_id, &morty).expect("get").map(|r| r.user_id),
            Some(remote_id)
        );
        assert_eq!(local.progress(remote_id, &rick).expect("get"), Some(mirrored));
        assert!(
            local
                .chat_history(remote_id, &morty)
                .expect("history")
                .iter()
                .all(|e| e.user_id == remote_id)
        );
        assert_eq!(local.memories(remote_id, &morty).expect("memories")[0].user_id, remote_id);
        assert!(local.profile_by_id(offline.id).expect("by id").is_none());
    }

    #[test]
    fn chat_pairs_inside_window_and_clears() {
        let (_, local) = store();
        let rick = CharacterId::from("rick");
        let user = UserId::new(1);
        let window = Duration::minutes(5);

        let first = local
            .append_chat(
                ChatEntry::from_message(user, rick.clone(), &ChatMessage::user("hey").at(t0())),
                window,
            )
            .expect("append");
        let second = local
            .append_chat(
                ChatEntry::from_message(
                    user,
                    rick.clone(),
                    &ChatMessage::character("what", Emotion::Angry).at(t0() + Duration::seconds(2)),
                ),
                window,
            )
            .expect("append");

        assert_eq!(first, AppendOutcome::Appended);
        assert_eq!(second, AppendOutcome::Paired);
        let history = local.chat_history(user, &rick).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].emotion, Emotion::Angry);

        assert!(local.clear_chat(user, &rick).expect("clear"));
        assert!(local.chat_history(user, &rick).expect("history").is_empty());
    }

    #[test]
    fn memories_rank_and_delete_by_id() {
        let (_, local) = store();
        let user = UserId::new(1);
        let rick = CharacterId::from("rick");

        let low = local
            .save_memory(user, &rick, &NewMemory::general("likes pickles"), t0())
            .expect("save");
        let high = local
            .save_memory(
                user,
                &rick,
                &NewMemory::general("hates the council").with_importance(5),
                t0(),
            )
            .expect("save");
        assert_eq!((low.id, high.id), (1, 2));

        let ranked = local.memories(user, &rick).expect("list");
        assert_eq!(ranked[0].id, high.id);

        assert!(local.delete_memory(user, &rick, low.id).expect("delete"));
        assert!(!local.delete_memory(user, &rick, low.id).expect("delete again"));
        assert_eq!(local.memories(user, &rick).expect("list").len(), 1);
    }

    #[test]
    fn mirror_memory_upserts_by_id() {
        let (_, local) = store();
        let user = UserId::new(1);
        let rick = CharacterId::from("rick");
        let mut entry = local
            .save_memory(user, &rick, &NewMemory::general("draft"), t0())
            .expect("save");
        entry.memory_content = "final".into();
        local.mirror_memory(&entry).expect("mirror");

        let stored = local.memories(user, &rick).expect("list");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].memory_content, "final");
    }

    #[test]
    fn sweep_is_idempotent_and_respects_importance() {
        let (_, local) = store();
        let user = UserId::new(1);
        let rick = CharacterId::from("rick");
        let old = t0() - Duration::days(40);

        local
            .save_memory(user, &rick, &NewMemory::general("old trivia"), old)
            .expect("save");
        local
            .save_memory(user, &rick, &NewMemory::general("old but vital").with_importance(8), old)
            .expect("save");
        local
            .save_memory(user, &rick, &NewMemory::general("fresh"), t0())
            .expect("save");

        let request = SweepRequest::memory(std::time::Duration::from_secs(30 * 86_400), 3);
        assert_eq!(local.sweep(user, &request, t0()).expect("sweep"), 1);
        assert_eq!(local.sweep(user, &request, t0()).expect("sweep again"), 0);
        assert_eq!(local.memories(user, &rick).expect("list").len(), 2);
    }

    #[test]
    fn sweep_rejects_profile_kind() {
        let (_, local) = store();
        let request = SweepRequest {
            kind: RecordKind::Progress,
            older_than_secs: 0,
            min_importance: None,
        };
        assert!(matches!(
            local.sweep(UserId::new(1), &request, t0()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn corrupt_blob_is_a_local_store_error() {
        let (kv, local) = store();
        kv.set("chat:1:rick", "not json").expect("set");
        let err = local
            .chat_history(UserId::new(1), &CharacterId::from("rick"))
            .unwrap_err();
        assert!(matches!(err, Error::LocalStore(_)));
    }
}
