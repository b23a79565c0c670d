//! Pattern counter and feedback persistence.
//!
//! The `patterns` table is the durable mirror of the learner's in-memory
//! counters; it survives restarts and is reloaded into the learner at startup.

use chrono::Utc;
use rusqlite::params;

use super::{DbError, EngineDb, PatternRow};
use crate::types::{FeedbackEvent, PatternKey};

impl EngineDb {
    /// Increment the usage (and optionally success) counters for one pattern
    /// key, creating the row on first use.
    pub fn bump_pattern(&self, key: &PatternKey, success: bool) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn_ref().execute(
            "INSERT INTO patterns (conflict_type, resolution_type, scope,
                                   times_used, times_successful, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4, ?5)
             ON CONFLICT(conflict_type, resolution_type, scope) DO UPDATE SET
                times_used = times_used + 1,
                times_successful = times_successful + ?4,
                updated_at = excluded.updated_at",
            params![
                key.conflict_type.as_str(),
                key.resolution_type.as_str(),
                key.scope.as_code(),
                success as i64,
                now,
            ],
        )?;
        Ok(())
    }

    /// All pattern rows, for warming the learner's in-memory counters.
    pub fn load_patterns(&self) -> Result<Vec<PatternRow>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT conflict_type, resolution_type, scope, times_used, times_successful
             FROM patterns",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(PatternRow {
                conflict_type: row.get(0)?,
                resolution_type: row.get(1)?,
                scope: row.get(2)?,
                times_used: row.get(3)?,
                times_successful: row.get(4)?,
            })
        })?;
        let mut patterns = Vec::new();
        for row in rows {
            patterns.push(row?);
        }
        Ok(patterns)
    }

    pub fn insert_feedback_event(&self, event: &FeedbackEvent) -> Result<(), DbError> {
        self.conn_ref().execute(
            "INSERT INTO feedback_events (id, conflict_id, resolution_id, rating, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.id,
                event.conflict_id,
                event.resolution_id,
                event.rating,
                event.created_at,
            ],
        )?;
        Ok(())
    }
}
