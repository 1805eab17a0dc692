pub mod chat;
pub mod emotion;
pub mod error;
pub mod records;
pub mod types;
pub mod validation;
pub mod wire;

pub use chat::{AppendOutcome, append_paired, rank_memories, try_pair};
pub use emotion::Emotion;
pub use error::{Error, Result};
pub use records::{
    ChatEntry, ChatMessage, MemoryEntry, NewMemory, ProgressRecord, ProgressUpdate, RecordKind,
    SweepRequest, UserProfile,
};
pub use types::{CharacterId, UserId};
