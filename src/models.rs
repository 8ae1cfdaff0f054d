use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// One card per (learner, word). Mutated only through review::commit; the
// `mastery` field is denormalized and written exclusively by the classifier
// inside the commit path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Card {
    pub id: i64,
    pub learner: String,
    pub word: String,
    pub step: u32,
    pub due_at: DateTime<Utc>,
    pub correct_count: u32,
    pub incorrect_count: u32,
    pub mastery: Mastery,
    pub last_reviewed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub version: i64,
}

impl Card {
    /// A card is due once its schedule has elapsed. Never-reviewed cards are
    /// not due; they enter through the intake queue instead.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.last_reviewed_at.is_some() && self.due_at <= now
    }

    pub fn is_new(&self) -> bool {
        self.last_reviewed_at.is_none()
    }

    /// Sustained-success margin used by the mastery rule. Can go negative
    /// for cards that are forgotten more often than recalled.
    pub fn success_margin(&self) -> i64 {
        self.correct_count as i64 - self.incorrect_count as i64
    }
}

// Learner's self-assessed recall outcome for one review.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Again,
    Hard,
    Good,
    Easy,
}

impl Rating {
    pub const ALL: [Rating; 4] = [Rating::Again, Rating::Hard, Rating::Good, Rating::Easy];

    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Again => "again",
            Rating::Hard => "hard",
            Rating::Good => "good",
            Rating::Easy => "easy",
        }
    }

    // Anything outside the fixed set is a caller error; no coercion.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "again" | "a" | "1" => Some(Rating::Again),
            "hard" | "h" | "2" => Some(Rating::Hard),
            "good" | "g" | "3" => Some(Rating::Good),
            "easy" | "e" | "4" => Some(Rating::Easy),
            _ => None,
        }
    }
}

// Coarse-grained learning status derived from a card's counters. Display
// only; every read path recomputes it via srs::classify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mastery {
    Unknown,
    Learning,
    Known,
    Mastered,
}

impl Mastery {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mastery::Unknown => "unknown",
            Mastery::Learning => "learning",
            Mastery::Known => "known",
            Mastery::Mastered => "mastered",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unknown" => Some(Mastery::Unknown),
            "learning" => Some(Mastery::Learning),
            "known" => Some(Mastery::Known),
            "mastered" => Some(Mastery::Mastered),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Mastery::Unknown => "Unknown",
            Mastery::Learning => "Learning",
            Mastery::Known => "Known",
            Mastery::Mastered => "Mastered",
        }
    }
}

// JSON output wrapper for CLI
#[derive(Debug, Serialize)]
pub struct JsonOutput<T: Serialize> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> JsonOutput<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}
