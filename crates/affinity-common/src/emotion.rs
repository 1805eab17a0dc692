use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::types::CharacterId;

/// Emotion shown by the character indicator and stored on progress and chat records.
#[derive(Debug, Clone, Copy, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Sad,
    Angry,
    Flirty,
    Aroused,
    Excited,
    Confused,
}

/// Keyword lists in tie-break order.
const KEYWORDS: &[(Emotion, &[&str])] = &[
    (
        Emotion::Happy,
        &[
            "haha", "great", "awesome", "love", "perfect", "excellent", "wonderful", "amazing",
            "fantastic", "brilliant", "good", "yes!", "yeah!", "woo", "nice",
        ],
    ),
    (
        Emotion::Excited,
        &[
            "wow", "incredible", "unbelievable", "adventure", "portal", "dimension", "science",
            "experiment", "discovery", "breakthrough", "genius", "!", "omg", "holy",
        ],
    ),
    (
        Emotion::Angry,
        &[
            "damn", "shit", "fuck", "stupid", "idiot", "moron", "hate", "angry", "pissed",
            "annoying", "irritating", "dumb", "pathetic", "worthless",
        ],
    ),
    (
        Emotion::Sad,
        &[
            "sorry", "sad", "depressed", "lonely", "hurt", "pain", "cry", "tears", "miss", "lost",
            "empty", "broken", "disappointed",
        ],
    ),
    (
        Emotion::Confused,
        &[
            "what", "huh", "confused", "understand", "explain", "how", "why", "wait", "hold on",
            "unclear", "lost", "???", "wha-",
        ],
    ),
    (
        Emotion::Flirty,
        &[
            "sexy", "hot", "beautiful", "gorgeous", "cute", "attractive", "kiss", "touch", "close",
            "intimate", "desire", "want you", "need you",
        ],
    ),
    (
        Emotion::Aroused,
        &["turned on", "horny", "want you", "desire", "lust", "bedroom", "touch"],
    ),
];

/// Emotions each character leans towards when the text is ambiguous.
const TENDENCIES: &[(&str, &[Emotion])] = &[
    ("rick", &[Emotion::Angry, Emotion::Excited, Emotion::Confused]),
    ("morty", &[Emotion::Confused, Emotion::Sad, Emotion::Excited]),
    ("evil_morty", &[Emotion::Angry, Emotion::Flirty, Emotion::Confused]),
    ("rick_prime", &[Emotion::Angry, Emotion::Flirty, Emotion::Excited]),
];

impl Emotion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Flirty => "flirty",
            Self::Aroused => "aroused",
            Self::Excited => "excited",
            Self::Confused => "confused",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "neutral" => Ok(Self::Neutral),
            "happy" => Ok(Self::Happy),
            "sad" => Ok(Self::Sad),
            "angry" => Ok(Self::Angry),
            "flirty" => Ok(Self::Flirty),
            "aroused" => Ok(Self::Aroused),
            "excited" => Ok(Self::Excited),
            "confused" => Ok(Self::Confused),
            other => Err(Error::Validation(format!("unknown emotion: {other}"))),
        }
    }
}

/// Classify text by counting keyword hits per emotion.
///
/// The emotion with the most hits wins; ties keep the earlier list entry.
/// Text with no hits is neutral.
pub fn classify(text: &str) -> Emotion {
    score(text, &[])
}

/// Classify a character's line, leaning towards that character's usual emotions.
///
/// Each preferred emotion gets half a hit on top of its keyword count, so the
/// preference settles ties and near-ties but never outweighs a full extra hit.
/// A line with no keyword hits at all is still neutral.
pub fn classify_for(text: &str, character: &CharacterId) -> Emotion {
    let preferred = TENDENCIES
        .iter()
        .find(|(id, _)| *id == character.as_str())
        .map(|(_, emotions)| *emotions)
        .unwrap_or(&[]);
    score(text, preferred)
}

fn score(text: &str, preferred: &[Emotion]) -> Emotion {
    let lower = text.to_lowercase();

    // Scores are doubled so the half-hit boost stays integral.
    let mut best = (Emotion::Neutral, 0usize);
    let mut any_hit = false;
    for (emotion, keywords) in KEYWORDS {
        let hits: usize = keywords
            .iter()
            .map(|keyword| lower.matches(keyword).count())
            .sum();
        any_hit |= hits > 0;
        let score = hits * 2 + usize::from(preferred.contains(emotion));
        if score > best.1 {
            best = (*emotion, score);
        }
    }

    if any_hit { best.0 } else { Emotion::Neutral }
}

/// Affection change for one conversation turn.
pub fn affection_delta(user: Emotion, character: Emotion) -> i32 {
    use Emotion::*;

    match (user, character) {
        (Angry, Angry) | (Sad, Sad) => -3,
        (Happy, Happy) | (Flirty, Flirty) => 5,
        (Happy, _) | (_, Happy) => 2,
        _ => 0,
    }
}
