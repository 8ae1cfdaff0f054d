//! Pure scheduling core: the fixed interval table, the state transition
//! function, and the mastery classifier. Nothing here touches the database
//! or the wall clock, which is what lets preview and commit share one code
//! path.

use chrono::{DateTime, Duration, Utc};

use crate::models::{Card, Mastery, Rating};

/// Highest step in the interval table. Steps beyond this reuse the capped
/// row; `good`/`easy` transitions saturate here.
pub const STEP_MAX: u32 = 3;

/// How far `correct_count` must lead `incorrect_count` before a capped card
/// counts as mastered. Policy constant, not a per-learner tunable.
pub const MASTERY_MARGIN: i64 = 3;

/// Candidate next intervals for one card, one per rating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Intervals {
    pub again: Duration,
    pub hard: Duration,
    pub good: Duration,
    pub easy: Duration,
}

impl Intervals {
    pub fn get(&self, rating: Rating) -> Duration {
        match rating {
            Rating::Again => self.again,
            Rating::Hard => self.hard,
            Rating::Good => self.good,
            Rating::Easy => self.easy,
        }
    }
}

/// Fixed step -> interval lookup. Out-of-range steps clamp to the capped
/// row; the lookup never fails, so all four candidates can always be
/// rendered.
pub fn intervals_for(step: u32) -> Intervals {
    match step {
        0 => Intervals {
            again: Duration::minutes(1),
            hard: Duration::minutes(1),
            good: Duration::minutes(10),
            easy: Duration::days(4),
        },
        1 => Intervals {
            again: Duration::minutes(1),
            hard: Duration::minutes(10),
            good: Duration::days(1),
            easy: Duration::days(4),
        },
        _ => Intervals {
            again: Duration::minutes(1),
            hard: Duration::days(1),
            good: Duration::days(3),
            easy: Duration::days(4),
        },
    }
}

/// The scheduler's output for one (card, rating, now) triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NextState {
    pub step: u32,
    pub due_at: DateTime<Utc>,
    pub correct_count: u32,
    pub incorrect_count: u32,
}

/// Compute the card state a commit of `rating` at `now` would produce.
/// The interval is looked up at the pre-transition step; the step then
/// moves. No side effects, safe to call for all four ratings to build a
/// preview.
pub fn next_state(card: &Card, rating: Rating, now: DateTime<Utc>) -> NextState {
    let due_at = now + intervals_for(card.step).get(rating);
    match rating {
        Rating::Again => NextState {
            step: 0,
            due_at,
            correct_count: card.correct_count,
            incorrect_count: card.incorrect_count + 1,
        },
        Rating::Hard => NextState {
            step: card.step.min(STEP_MAX),
            due_at,
            correct_count: card.correct_count,
            incorrect_count: card.incorrect_count,
        },
        Rating::Good => NextState {
            step: (card.step + 1).min(STEP_MAX),
            due_at,
            correct_count: card.correct_count + 1,
            incorrect_count: card.incorrect_count,
        },
        Rating::Easy => NextState {
            step: (card.step + 2).min(STEP_MAX),
            due_at,
            correct_count: card.correct_count + 1,
            incorrect_count: card.incorrect_count,
        },
    }
}

/// Derive the card's mastery status. First match wins:
/// never reviewed -> unknown; early steps -> learning; capped step with a
/// sustained success margin -> mastered; otherwise known.
///
/// Callers must never set the stored status themselves; commit invokes this
/// on the post-transition card and writes the result in the same update.
pub fn classify(card: &Card) -> Mastery {
    if card.last_reviewed_at.is_none() {
        return Mastery::Unknown;
    }
    if card.step <= 1 {
        return Mastery::Learning;
    }
    if card.step >= STEP_MAX && card.success_margin() >= MASTERY_MARGIN {
        return Mastery::Mastered;
    }
    Mastery::Known
}
