//! Card store: the single shared mutable resource. Per-card linearizability
//! is enforced here with an optimistic version check on every write; the
//! scheduler above this layer holds no state of its own.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Result};
use serde::Serialize;
use std::path::Path;

use crate::models::{Card, Mastery};

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self { conn })
    }

    pub fn init(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cards (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                learner TEXT NOT NULL,
                word TEXT NOT NULL,
                step INTEGER NOT NULL DEFAULT 0,
                due_at TEXT NOT NULL,
                correct_count INTEGER NOT NULL DEFAULT 0,
                incorrect_count INTEGER NOT NULL DEFAULT 0,
                mastery TEXT NOT NULL DEFAULT 'unknown',
                last_reviewed_at TEXT,
                created_at TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 0,
                UNIQUE(learner, word)
            );

            CREATE INDEX IF NOT EXISTS idx_cards_due ON cards(learner, due_at);
            CREATE INDEX IF NOT EXISTS idx_cards_new ON cards(learner, last_reviewed_at);
            CREATE INDEX IF NOT EXISTS idx_cards_mastery ON cards(learner, mastery);
            "#,
        )?;

        Ok(())
    }

    /// Create a card for (learner, word): step 0, unknown, never reviewed.
    /// `due_at` is seeded with the creation time; it only becomes meaningful
    /// after the first commit.
    pub fn add_card(&self, learner: &str, word: &str, now: DateTime<Utc>) -> Result<i64> {
        self.conn.execute(
            r#"
            INSERT INTO cards (learner, word, due_at, created_at)
            VALUES (?1, ?2, ?3, ?3)
            "#,
            params![learner, word, now.to_rfc3339()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_card(&self, id: i64) -> Result<Option<Card>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM cards WHERE id = ?1",
            CARD_COLUMNS
        ))?;

        match stmt.query_row(params![id], card_from_row) {
            Ok(card) => Ok(Some(card)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Conditional single-row update. Returns false when the stored version
    /// no longer matches `expected_version`, i.e. someone committed in
    /// between; the caller maps that to a stale-commit error.
    pub fn put_card(&self, card: &Card, expected_version: i64) -> Result<bool> {
        let rows = self.conn.execute(
            r#"
            UPDATE cards
            SET step = ?1,
                due_at = ?2,
                correct_count = ?3,
                incorrect_count = ?4,
                mastery = ?5,
                last_reviewed_at = ?6,
                version = ?7
            WHERE id = ?8 AND version = ?9
            "#,
            params![
                card.step,
                card.due_at.to_rfc3339(),
                card.correct_count,
                card.incorrect_count,
                card.mastery.as_str(),
                card.last_reviewed_at.map(|t| t.to_rfc3339()),
                expected_version + 1,
                card.id,
                expected_version,
            ],
        )?;
        Ok(rows > 0)
    }

    /// Reviewed cards whose schedule has elapsed. Final ranking happens in
    /// the due selector; this returns them roughly ordered for the index.
    pub fn query_due(&self, learner: &str, now: DateTime<Utc>) -> Result<Vec<Card>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {} FROM cards
            WHERE learner = ?1 AND last_reviewed_at IS NOT NULL AND due_at <= ?2
            ORDER BY due_at ASC
            "#,
            CARD_COLUMNS
        ))?;

        let rows = stmt.query_map(params![learner, now.to_rfc3339()], card_from_row)?;
        rows.collect()
    }

    /// Never-reviewed cards in creation order, for the intake queue.
    pub fn query_new(&self, learner: &str) -> Result<Vec<Card>> {
        let mut stmt = self.conn.prepare(&format!(
            r#"
            SELECT {} FROM cards
            WHERE learner = ?1 AND last_reviewed_at IS NULL
            ORDER BY id ASC
            "#,
            CARD_COLUMNS
        ))?;

        let rows = stmt.query_map(params![learner], card_from_row)?;
        rows.collect()
    }

    pub fn list_cards(&self, learner: &str) -> Result<Vec<Card>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM cards WHERE learner = ?1 ORDER BY word ASC",
            CARD_COLUMNS
        ))?;

        let rows = stmt.query_map(params![learner], card_from_row)?;
        rows.collect()
    }

    pub fn delete_card(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM cards WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn get_stats(&self, learner: &str, now: DateTime<Utc>) -> Result<Stats> {
        let count = |sql: &str, extra: &dyn rusqlite::ToSql| -> Result<i64> {
            self.conn
                .query_row(sql, params![learner, extra], |row| row.get(0))
        };

        let total_cards: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM cards WHERE learner = ?1",
            params![learner],
            |row| row.get(0),
        )?;

        let new_cards: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM cards WHERE learner = ?1 AND last_reviewed_at IS NULL",
            params![learner],
            |row| row.get(0),
        )?;

        let due_now = count(
            "SELECT COUNT(*) FROM cards WHERE learner = ?1 AND last_reviewed_at IS NOT NULL AND due_at <= ?2",
            &now.to_rfc3339(),
        )?;

        let by_mastery = |m: Mastery| {
            count(
                "SELECT COUNT(*) FROM cards WHERE learner = ?1 AND mastery = ?2",
                &m.as_str(),
            )
        };

        let (total_correct, total_incorrect): (i64, i64) = self.conn.query_row(
            r#"
            SELECT COALESCE(SUM(correct_count), 0), COALESCE(SUM(incorrect_count), 0)
            FROM cards WHERE learner = ?1
            "#,
            params![learner],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        Ok(Stats {
            total_cards,
            new_cards,
            due_now,
            learning: by_mastery(Mastery::Learning)?,
            known: by_mastery(Mastery::Known)?,
            mastered: by_mastery(Mastery::Mastered)?,
            total_correct,
            total_incorrect,
        })
    }
}

const CARD_COLUMNS: &str = "id, learner, word, step, due_at, correct_count, \
                            incorrect_count, mastery, last_reviewed_at, created_at, version";

fn card_from_row(row: &rusqlite::Row) -> rusqlite::Result<Card> {
    let mastery_str: String = row.get(7)?;
    let last_reviewed: Option<String> = row.get(8)?;
    Ok(Card {
        id: row.get(0)?,
        learner: row.get(1)?,
        word: row.get(2)?,
        step: row.get(3)?,
        due_at: parse_ts(4, row.get(4)?)?,
        correct_count: row.get(5)?,
        incorrect_count: row.get(6)?,
        mastery: Mastery::from_str(&mastery_str).unwrap_or(Mastery::Unknown),
        last_reviewed_at: last_reviewed.map(|s| parse_ts(8, s)).transpose()?,
        created_at: parse_ts(9, row.get(9)?)?,
        version: row.get(10)?,
    })
}

fn parse_ts(idx: usize, s: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

#[derive(Debug, Clone, Serialize)]
pub struct Stats {
    pub total_cards: i64,
    pub new_cards: i64,
    pub due_now: i64,
    pub learning: i64,
    pub known: i64,
    pub mastered: i64,
    pub total_correct: i64,
    pub total_incorrect: i64,
}
