//! Pattern learner: turns resolution feedback into confidence adjustments.
//!
//! Counters live in a concurrent map so parallel board scans can read them
//! without touching the database; every write is mirrored to SQLite inside
//! the feedback transaction so the counters survive restarts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::LearningConfig;
use crate::db::EngineDb;
use crate::error::EngineError;
use crate::types::{
    ConflictStatus, ConflictType, FeedbackEvent, PatternKey, PatternScope, ResolutionType,
};

#[derive(Default)]
struct PatternCounters {
    times_used: AtomicU64,
    times_successful: AtomicU64,
}

pub struct PatternLearner {
    config: LearningConfig,
    counters: DashMap<PatternKey, PatternCounters>,
    db: Arc<Mutex<EngineDb>>,
}

impl PatternLearner {
    pub fn new(config: LearningConfig, db: Arc<Mutex<EngineDb>>) -> Self {
        Self {
            config,
            counters: DashMap::new(),
            db,
        }
    }

    /// Warm the in-memory counters from the `patterns` table.
    /// Returns the number of pattern keys loaded.
    pub fn load(&self) -> Result<usize, EngineError> {
        let rows = self.db.lock().load_patterns()?;
        let mut loaded = 0;
        for row in rows {
            let (Some(conflict_type), Some(resolution_type)) = (
                ConflictType::from_code(&row.conflict_type),
                ResolutionType::from_code(&row.resolution_type),
            ) else {
                log::warn!(
                    "skipping pattern row with unrecognized codes: {}/{}",
                    row.conflict_type,
                    row.resolution_type
                );
                continue;
            };
            let key = PatternKey {
                conflict_type,
                resolution_type,
                scope: PatternScope::from_code(&row.scope),
            };
            let entry = self.counters.entry(key).or_default();
            entry.times_used.store(row.times_used, Ordering::Relaxed);
            entry.times_successful.store(row.times_successful, Ordering::Relaxed);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Record one outcome rating for an applied resolution.
    ///
    /// A rating at or above the success threshold counts as a success, bumps
    /// the resolution's acceptance counter, and confirms the conflict as
    /// Resolved. Both the board-scoped and the global pattern keys are
    /// updated so cross-board learning accrues from day one.
    pub fn record_feedback(
        &self,
        conflict_id: &str,
        resolution_id: &str,
        rating: u8,
    ) -> Result<FeedbackEvent, EngineError> {
        if !(1..=5).contains(&rating) {
            return Err(EngineError::InvalidRating(rating));
        }
        let success = rating >= self.config.success_threshold;

        let event = {
            let db = self.db.lock();
            let resolution = db
                .get_resolution(resolution_id)?
                .ok_or_else(|| EngineError::not_found("resolution", resolution_id))?;
            if resolution.conflict_id != conflict_id {
                return Err(EngineError::Logic(format!(
                    "resolution {resolution_id} belongs to conflict {}, not {conflict_id}",
                    resolution.conflict_id
                )));
            }
            let conflict = db
                .get_conflict(conflict_id)?
                .ok_or_else(|| EngineError::not_found("conflict", conflict_id))?;

            let event = FeedbackEvent {
                id: format!("fb-{}", uuid::Uuid::new_v4()),
                conflict_id: conflict_id.to_string(),
                resolution_id: resolution_id.to_string(),
                rating,
                created_at: Utc::now().to_rfc3339(),
            };

            let keys = [
                PatternKey {
                    conflict_type: conflict.conflict_type,
                    resolution_type: resolution.resolution_type,
                    scope: PatternScope::Board(conflict.board_id.clone()),
                },
                PatternKey {
                    conflict_type: conflict.conflict_type,
                    resolution_type: resolution.resolution_type,
                    scope: PatternScope::Global,
                },
            ];

            db.with_transaction(|db| {
                db.insert_feedback_event(&event)?;
                db.record_resolution_accepted(resolution_id)?;
                for key in &keys {
                    db.bump_pattern(key, success)?;
                }
                Ok(())
            })?;

            if success {
                db.set_conflict_status(conflict_id, ConflictStatus::Resolved)?;
            }

            for key in keys {
                let entry = self.counters.entry(key).or_default();
                entry.times_used.fetch_add(1, Ordering::Relaxed);
                if success {
                    entry.times_successful.fetch_add(1, Ordering::Relaxed);
                }
            }
            event
        };

        Ok(event)
    }

    /// Success rate and sample count for one key, (0.0, 0) when unseen.
    pub fn stats(
        &self,
        conflict_type: ConflictType,
        resolution_type: ResolutionType,
        scope: &PatternScope,
    ) -> (f64, u64) {
        let key = PatternKey {
            conflict_type,
            resolution_type,
            scope: scope.clone(),
        };
        match self.counters.get(&key) {
            Some(entry) => {
                let used = entry.times_used.load(Ordering::Relaxed);
                if used == 0 {
                    (0.0, 0)
                } else {
                    let successful = entry.times_successful.load(Ordering::Relaxed);
                    (successful as f64 / used as f64, used)
                }
            }
            None => (0.0, 0),
        }
    }

    #[cfg(test)]
    pub(crate) fn seed_counters(&self, key: PatternKey, used: u64, successful: u64) {
        let entry = self.counters.entry(key).or_default();
        entry.times_used.store(used, Ordering::Relaxed);
        entry.times_successful.store(successful, Ordering::Relaxed);
    }

    /// Learned confidence delta for a pairing on one board.
    ///
    /// Prefers board-scoped history once it has enough samples, falls back to
    /// global, and returns 0 with no history at all. The delta ramps in with
    /// sample count so two lucky outcomes cannot swing a score by 50 points:
    /// `(rate - 0.5) * 100 * min(n, maturity) / maturity`, clamped.
    pub fn adjustment_for(
        &self,
        conflict_type: ConflictType,
        resolution_type: ResolutionType,
        board_id: &str,
    ) -> i8 {
        let (board_rate, board_n) = self.stats(
            conflict_type,
            resolution_type,
            &PatternScope::Board(board_id.to_string()),
        );
        let (rate, n) = if board_n >= self.config.board_min_samples {
            (board_rate, board_n)
        } else {
            self.stats(conflict_type, resolution_type, &PatternScope::Global)
        };
        if n == 0 {
            return 0;
        }

        let maturity = self.config.maturity_samples.max(1);
        let weight = n.min(maturity) as f64 / maturity as f64;
        let raw = (rate - 0.5) * 100.0 * weight;
        let bound = i64::from(self.config.max_adjustment);
        (raw.round() as i64).clamp(-bound, bound) as i8
    }
}
