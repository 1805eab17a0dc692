use crate::error::{Error, Result};
use crate::records::{NewMemory, ProgressUpdate};
use crate::types::CharacterId;

pub const MAX_USERNAME_LEN: usize = 50;
pub const MAX_CHARACTER_ID_LEN: usize = 50;
pub const MAX_MEMORY_TYPE_LEN: usize = 50;
pub const MIN_AFFECTION: i32 = 0;
pub const MAX_AFFECTION: i32 = 100;

/// Clamp an affection value into the displayable range.
pub fn clamp_affection(level: i32) -> i32 {
    level.clamp(MIN_AFFECTION, MAX_AFFECTION)
}

pub fn validate_username(username: &str) -> Result<()> {
    if username.trim().is_empty() {
        return Err(Error::Validation("username cannot be empty".into()));
    }
    if username.chars().count() > MAX_USERNAME_LEN {
        return Err(Error::Validation(format!(
            "username exceeds {MAX_USERNAME_LEN} characters"
        )));
    }
    Ok(())
}

pub fn validate_character_id(character: &CharacterId) -> Result<()> {
    if character.as_str().is_empty() {
        return Err(Error::Validation("character id is required".into()));
    }
    if character.as_str().chars().count() > MAX_CHARACTER_ID_LEN {
        return Err(Error::Validation(format!(
            "character id exceeds {MAX_CHARACTER_ID_LEN} characters"
        )));
    }
    Ok(())
}

/// Validate and normalize a progress payload. Affection is clamped, not rejected.
pub fn normalize_progress(update: ProgressUpdate) -> ProgressUpdate {
    ProgressUpdate {
        affection_level: clamp_affection(update.affection_level),
        ..update
    }
}

pub fn validate_memory(memory: &NewMemory) -> Result<()> {
    if memory.memory_type.trim().is_empty() {
        return Err(Error::Validation("memory type cannot be empty".into()));
    }
    if memory.memory_type.chars().count() > MAX_MEMORY_TYPE_LEN {
        return Err(Error::Validation(format!(
            "memory type exceeds {MAX_MEMORY_TYPE_LEN} characters"
        )));
    }
    if memory.memory_content.trim().is_empty() {
        return Err(Error::Validation("memory content cannot be empty".into()));
    }
    if memory.importance_score < 1 {
        return Err(Error::Validation(
            "importance score must be at least 1".into(),
        ));
    }
    Ok(())
}
