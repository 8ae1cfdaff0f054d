//! Review commit service and queue selection. Every state change, whatever
//! UI triggered it (explicit review, passive game mode, batch session),
//! funnels through `commit`; preview and commit share the same pure core.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::db::Database;
use crate::error::{Result, SrsError};
use crate::models::{Card, Rating};
use crate::srs::{self, Intervals};

// A commit timestamp slightly ahead of the service clock is clamped with a
// warning; beyond the reject window it is refused outright.
const CLOCK_SKEW_CLAMP_SECS: i64 = 5 * 60;
const CLOCK_SKEW_REJECT_SECS: i64 = 24 * 60 * 60;

/// Previous and next card state from one commit, for caller-side UI
/// feedback and mastery re-display.
#[derive(Debug, Clone, Serialize)]
pub struct CommitResult {
    pub previous: Card,
    pub next: Card,
}

/// The candidate intervals a commit would schedule for this card, one per
/// rating. Stateless read; guaranteed equal to what `commit` applies at the
/// same instant.
pub fn preview(card: &Card) -> Intervals {
    srs::intervals_for(card.step)
}

/// Apply `rating` to the card and persist the result. Single entry point
/// for all scheduling state change.
pub fn commit(db: &Database, card_id: i64, rating: Rating, now: DateTime<Utc>) -> Result<CommitResult> {
    commit_at(db, card_id, rating, now, Utc::now())
}

// Split out so tests can pin the service clock used for skew checks.
fn commit_at(
    db: &Database,
    card_id: i64,
    rating: Rating,
    now: DateTime<Utc>,
    service_clock: DateTime<Utc>,
) -> Result<CommitResult> {
    let now = plausible_now(now, service_clock)?;

    let previous = db
        .get_card(card_id)?
        .ok_or(SrsError::CardNotFound(card_id))?;

    // Out-of-order retry or clock regression: refuse rather than produce a
    // due date earlier than the previous review.
    if let Some(last) = previous.last_reviewed_at {
        if now < last {
            return Err(SrsError::StaleCommit);
        }
    }

    let state = srs::next_state(&previous, rating, now);
    let mut next = previous.clone();
    next.step = state.step;
    next.due_at = state.due_at;
    next.correct_count = state.correct_count;
    next.incorrect_count = state.incorrect_count;
    next.last_reviewed_at = Some(now);
    // Only writer of the denormalized status, inside the same update as the
    // step change.
    next.mastery = srs::classify(&next);

    if !db.put_card(&next, previous.version)? {
        return Err(SrsError::StaleCommit);
    }
    next.version = previous.version + 1;

    log::debug!(
        "committed {} on card {}: step {} -> {}, due {}",
        rating.as_str(),
        card_id,
        previous.step,
        next.step,
        next.due_at.to_rfc3339()
    );

    Ok(CommitResult { previous, next })
}

fn plausible_now(now: DateTime<Utc>, service_clock: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let ahead = (now - service_clock).num_seconds();
    if ahead > CLOCK_SKEW_REJECT_SECS {
        return Err(SrsError::ClockSkew);
    }
    if ahead > CLOCK_SKEW_CLAMP_SECS {
        log::warn!(
            "commit time {} is {}s ahead of the service clock, clamping",
            now.to_rfc3339(),
            ahead
        );
        return Ok(service_clock);
    }
    Ok(now)
}

/// One rating applied to many cards, e.g. a match game silently crediting
/// `good` for every pair the learner solved. Cards are independent, so a
/// failure on one never aborts the rest.
#[derive(Debug, Default, Serialize)]
pub struct BatchOutcome {
    pub applied: Vec<CommitResult>,
    pub failed: Vec<BatchFailure>,
}

#[derive(Debug, Serialize)]
pub struct BatchFailure {
    pub card_id: i64,
    pub error: String,
}

pub fn commit_batch(
    db: &Database,
    card_ids: &[i64],
    rating: Rating,
    now: DateTime<Utc>,
) -> Result<BatchOutcome> {
    let mut outcome = BatchOutcome::default();
    for &card_id in card_ids {
        match commit(db, card_id, rating, now) {
            Ok(result) => outcome.applied.push(result),
            Err(SrsError::Db(e)) => return Err(SrsError::Db(e)),
            Err(e) => outcome.failed.push(BatchFailure {
                card_id,
                error: e.to_string(),
            }),
        }
    }
    Ok(outcome)
}

/// Rank due cards into a review queue: most overdue first, weaker cards
/// first on equal overdueness, card id as the final tie-break so the order
/// is total and stable.
pub fn select_due(cards: Vec<Card>, now: DateTime<Utc>, limit: usize) -> Vec<Card> {
    let mut due: Vec<Card> = cards.into_iter().filter(|c| c.is_due(now)).collect();
    due.sort_by(|a, b| {
        a.due_at
            .cmp(&b.due_at)
            .then(a.step.cmp(&b.step))
            .then(a.id.cmp(&b.id))
    });
    due.truncate(limit);
    due
}

/// Intake queue: never-reviewed cards in creation order. Kept strictly
/// separate from the due queue so the caller's progress bar stays honest.
pub fn select_new(cards: Vec<Card>, limit: usize) -> Vec<Card> {
    let mut fresh: Vec<Card> = cards.into_iter().filter(Card::is_new).collect();
    fresh.sort_by_key(|c| c.id);
    fresh.truncate(limit);
    fresh
}

pub fn due_queue(db: &Database, learner: &str, now: DateTime<Utc>, limit: usize) -> Result<Vec<Card>> {
    Ok(select_due(db.query_due(learner, now)?, now, limit))
}

pub fn new_queue(db: &Database, learner: &str, limit: usize) -> Result<Vec<Card>> {
    Ok(select_new(db.query_new(learner)?, limit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Mastery;
    use crate::srs::{MASTERY_MARGIN, STEP_MAX};
    use chrono::{Duration, TimeZone};

    fn setup_db() -> Database {
        let db = Database::open(":memory:").expect("Failed to create in-memory database");
        db.init().expect("Failed to initialize database");
        db
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    /// Drive a card into a given state through the public commit path only.
    fn card_with_history(db: &Database, word: &str, ratings: &[Rating]) -> i64 {
        let id = db.add_card("default", word, t0()).unwrap();
        let mut at = t0();
        for &rating in ratings {
            at += Duration::days(5);
            commit_at(db, id, rating, at, at).unwrap();
        }
        id
    }

    mod commit_tests {
        use super::*;

        #[test]
        fn good_on_new_card_schedules_ten_minutes() {
            let db = setup_db();
            let id = db.add_card("default", "perro", t0()).unwrap();

            let result = commit_at(&db, id, Rating::Good, t0(), t0()).unwrap();
            assert_eq!(result.previous.step, 0);
            assert_eq!(result.next.step, 1);
            assert_eq!(result.next.due_at, t0() + Duration::minutes(10));
            assert_eq!(result.next.correct_count, 1);
            assert_eq!(result.next.mastery, Mastery::Learning);
            assert_eq!(result.next.version, 1);

            let stored = db.get_card(id).unwrap().unwrap();
            assert_eq!(stored.step, 1);
            assert_eq!(stored.version, 1);
            assert_eq!(stored.mastery, Mastery::Learning);
        }

        #[test]
        fn again_at_step_2_resets_and_stays_learning() {
            let db = setup_db();
            let id = card_with_history(&db, "perro", &[Rating::Good, Rating::Good]);
            let card = db.get_card(id).unwrap().unwrap();
            assert_eq!(card.step, 2);

            let at = t0() + Duration::days(30);
            let result = commit_at(&db, id, Rating::Again, at, at).unwrap();
            assert_eq!(result.next.step, 0);
            assert_eq!(result.next.incorrect_count, card.incorrect_count + 1);
            assert_eq!(result.next.correct_count, card.correct_count);
            assert_eq!(result.next.due_at, at + Duration::minutes(1));
            assert_eq!(result.next.mastery, Mastery::Learning);
        }

        #[test]
        fn easy_at_capped_step_with_margin_is_mastered() {
            let db = setup_db();
            let id = card_with_history(&db, "perro", &[Rating::Good, Rating::Good]);

            let at = t0() + Duration::days(30);
            let result = commit_at(&db, id, Rating::Easy, at, at).unwrap();
            assert_eq!(result.next.step, STEP_MAX);
            assert_eq!(result.next.success_margin(), MASTERY_MARGIN);
            assert_eq!(result.next.due_at, at + Duration::days(4));
            assert_eq!(result.next.mastery, Mastery::Mastered);
        }

        #[test]
        fn commit_matches_preview_for_every_rating() {
            let db = setup_db();
            let at = t0() + Duration::days(10);
            for rating in Rating::ALL {
                let word = format!("palabra-{}", rating.as_str());
                let id = card_with_history(&db, &word, &[Rating::Good]);
                let card = db.get_card(id).unwrap().unwrap();

                let predicted = at + preview(&card).get(rating);
                let result = commit_at(&db, id, rating, at, at).unwrap();
                assert_eq!(result.next.due_at, predicted, "rating {}", rating.as_str());
            }
        }

        #[test]
        fn preview_does_not_mutate_stored_state() {
            let db = setup_db();
            let id = card_with_history(&db, "perro", &[Rating::Good]);
            let before = db.get_card(id).unwrap().unwrap();

            for _ in 0..5 {
                let _ = preview(&before);
            }

            let after = db.get_card(id).unwrap().unwrap();
            assert_eq!(after.step, before.step);
            assert_eq!(after.version, before.version);
            assert_eq!(after.due_at, before.due_at);
        }

        #[test]
        fn non_again_ratings_push_due_past_last_review() {
            let db = setup_db();
            let at = t0() + Duration::days(10);
            for rating in [Rating::Hard, Rating::Good, Rating::Easy] {
                let word = format!("palabra-{}", rating.as_str());
                let id = card_with_history(&db, &word, &[Rating::Good]);
                let result = commit_at(&db, id, rating, at, at).unwrap();
                assert!(result.next.due_at > result.next.last_reviewed_at.unwrap());
            }
        }

        #[test]
        fn unknown_card_is_reported_not_created() {
            let db = setup_db();
            let err = commit_at(&db, 404, Rating::Good, t0(), t0()).unwrap_err();
            assert!(matches!(err, SrsError::CardNotFound(404)));
        }

        #[test]
        fn commit_before_last_review_is_stale() {
            let db = setup_db();
            let id = card_with_history(&db, "perro", &[Rating::Good]);
            let card = db.get_card(id).unwrap().unwrap();

            let earlier = card.last_reviewed_at.unwrap() - Duration::minutes(1);
            let err = commit_at(&db, id, Rating::Good, earlier, earlier).unwrap_err();
            assert!(matches!(err, SrsError::StaleCommit));

            let stored = db.get_card(id).unwrap().unwrap();
            assert_eq!(stored.version, card.version);
        }

        #[test]
        fn concurrent_writer_loses_with_stale_commit() {
            let db = setup_db();
            let id = db.add_card("default", "perro", t0()).unwrap();

            // A second session committed between our read and our write.
            let snapshot = db.get_card(id).unwrap().unwrap();
            commit_at(&db, id, Rating::Good, t0(), t0()).unwrap();
            assert!(!db.put_card(&snapshot, snapshot.version).unwrap());

            // The first commit's result stands.
            let stored = db.get_card(id).unwrap().unwrap();
            assert_eq!(stored.step, 1);
            assert_eq!(stored.version, 1);
        }

        #[test]
        fn far_future_commit_time_is_rejected() {
            let db = setup_db();
            let id = db.add_card("default", "perro", t0()).unwrap();

            let skewed = t0() + Duration::days(2);
            let err = commit_at(&db, id, Rating::Good, skewed, t0()).unwrap_err();
            assert!(matches!(err, SrsError::ClockSkew));

            let stored = db.get_card(id).unwrap().unwrap();
            assert_eq!(stored.version, 0);
        }

        #[test]
        fn small_future_skew_is_clamped_to_the_service_clock() {
            let db = setup_db();
            let id = db.add_card("default", "perro", t0()).unwrap();

            let skewed = t0() + Duration::minutes(30);
            let result = commit_at(&db, id, Rating::Good, skewed, t0()).unwrap();
            assert_eq!(result.next.last_reviewed_at, Some(t0()));
            assert_eq!(result.next.due_at, t0() + Duration::minutes(10));
        }
    }

    mod batch_tests {
        use super::*;

        #[test]
        fn batch_commits_each_card_independently() {
            let db = setup_db();
            let a = db.add_card("default", "uno", t0()).unwrap();
            let b = db.add_card("default", "dos", t0()).unwrap();

            let outcome = commit_batch(&db, &[a, 404, b], Rating::Good, t0()).unwrap();
            assert_eq!(outcome.applied.len(), 2);
            assert_eq!(outcome.failed.len(), 1);
            assert_eq!(outcome.failed[0].card_id, 404);

            assert_eq!(db.get_card(a).unwrap().unwrap().step, 1);
            assert_eq!(db.get_card(b).unwrap().unwrap().step, 1);
        }
    }

    mod selector_tests {
        use super::*;

        fn reviewed_card(db: &Database, word: &str, due_at: DateTime<Utc>, step: u32) -> i64 {
            let id = db.add_card("default", word, t0()).unwrap();
            let mut card = db.get_card(id).unwrap().unwrap();
            card.step = step;
            card.last_reviewed_at = Some(t0());
            card.due_at = due_at;
            db.put_card(&card, 0).unwrap();
            id
        }

        #[test]
        fn most_overdue_card_comes_first() {
            let db = setup_db();
            let now = t0() + Duration::days(4);
            let one_day = reviewed_card(&db, "uno", now - Duration::days(1), 1);
            let three_days = reviewed_card(&db, "tres", now - Duration::days(3), 1);

            let queue = due_queue(&db, "default", now, 10).unwrap();
            let ids: Vec<i64> = queue.iter().map(|c| c.id).collect();
            assert_eq!(ids, vec![three_days, one_day]);
        }

        #[test]
        fn equal_overdueness_prioritizes_the_weaker_card() {
            let db = setup_db();
            let now = t0() + Duration::days(2);
            let due = now - Duration::days(1);
            let strong = reviewed_card(&db, "fuerte", due, 3);
            let weak = reviewed_card(&db, "debil", due, 0);

            let queue = due_queue(&db, "default", now, 10).unwrap();
            let ids: Vec<i64> = queue.iter().map(|c| c.id).collect();
            assert_eq!(ids, vec![weak, strong]);
        }

        #[test]
        fn due_queue_respects_the_limit() {
            let db = setup_db();
            let now = t0() + Duration::days(2);
            for i in 0..5 {
                reviewed_card(&db, &format!("palabra{}", i), t0(), 1);
            }

            assert_eq!(due_queue(&db, "default", now, 3).unwrap().len(), 3);
        }

        #[test]
        fn due_queue_never_contains_new_cards() {
            let db = setup_db();
            db.add_card("default", "nuevo", t0()).unwrap();
            reviewed_card(&db, "visto", t0(), 1);

            let queue = due_queue(&db, "default", t0() + Duration::days(1), 10).unwrap();
            assert_eq!(queue.len(), 1);
            assert_eq!(queue[0].word, "visto");
        }

        #[test]
        fn new_queue_is_creation_ordered_and_capped() {
            let db = setup_db();
            let a = db.add_card("default", "zeta", t0()).unwrap();
            let b = db.add_card("default", "alfa", t0()).unwrap();
            db.add_card("default", "beta", t0()).unwrap();
            reviewed_card(&db, "visto", t0(), 1);

            let queue = new_queue(&db, "default", 2).unwrap();
            let ids: Vec<i64> = queue.iter().map(|c| c.id).collect();
            assert_eq!(ids, vec![a, b]);
        }

        #[test]
        fn select_due_is_deterministic() {
            let db = setup_db();
            let now = t0() + Duration::days(1);
            for i in 0..4 {
                reviewed_card(&db, &format!("palabra{}", i), t0(), 1);
            }

            let first = due_queue(&db, "default", now, 10).unwrap();
            let second = due_queue(&db, "default", now, 10).unwrap();
            let first_ids: Vec<i64> = first.iter().map(|c| c.id).collect();
            let second_ids: Vec<i64> = second.iter().map(|c| c.id).collect();
            assert_eq!(first_ids, second_ids);
        }
    }
}
