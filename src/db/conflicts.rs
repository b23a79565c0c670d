//! Conflict and resolution persistence.

use chrono::Utc;
use rusqlite::{params, Row};

use super::{DbError, EngineDb, ScanStateRow};
use crate::types::{Conflict, ConflictStatus, ConflictType, Resolution, ResolutionType, Severity};

const CONFLICT_COLS: &str = "id, board_id, conflict_type, severity, status, fingerprint, \
     summary, detail, affected_tasks, affected_users, detected_at, last_seen_at, resolved_at";

const RESOLUTION_COLS: &str = "id, conflict_id, resolution_type, steps, impact_summary, \
     impact_days, base_confidence, learned_adjustment, final_confidence, times_suggested, \
     times_accepted, superseded, created_at";

/// Build a conversion error for an unrecognized enum code in a row.
fn bad_code(idx: usize, code: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        format!("unrecognized code '{code}'").into(),
    )
}

fn json_vec(idx: usize, raw: String) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(&raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn map_conflict(row: &Row<'_>) -> rusqlite::Result<Conflict> {
    let conflict_type: String = row.get(2)?;
    let severity: String = row.get(3)?;
    let status: String = row.get(4)?;
    Ok(Conflict {
        id: row.get(0)?,
        board_id: row.get(1)?,
        conflict_type: ConflictType::from_code(&conflict_type).ok_or_else(|| bad_code(2, &conflict_type))?,
        severity: Severity::from_code(&severity).ok_or_else(|| bad_code(3, &severity))?,
        status: ConflictStatus::from_code(&status).ok_or_else(|| bad_code(4, &status))?,
        fingerprint: row.get(5)?,
        summary: row.get(6)?,
        detail: row.get(7)?,
        affected_tasks: json_vec(8, row.get(8)?)?,
        affected_users: json_vec(9, row.get(9)?)?,
        detected_at: row.get(10)?,
        last_seen_at: row.get(11)?,
        resolved_at: row.get(12)?,
    })
}

fn map_resolution(row: &Row<'_>) -> rusqlite::Result<Resolution> {
    let resolution_type: String = row.get(2)?;
    Ok(Resolution {
        id: row.get(0)?,
        conflict_id: row.get(1)?,
        resolution_type: ResolutionType::from_code(&resolution_type)
            .ok_or_else(|| bad_code(2, &resolution_type))?,
        steps: json_vec(3, row.get(3)?)?,
        impact_summary: row.get(4)?,
        impact_days: row.get(5)?,
        base_confidence: row.get(6)?,
        learned_adjustment: row.get(7)?,
        final_confidence: row.get(8)?,
        times_suggested: row.get(9)?,
        times_accepted: row.get(10)?,
        superseded: row.get(11)?,
        created_at: row.get(12)?,
    })
}

impl EngineDb {
    // =========================================================================
    // Conflicts
    // =========================================================================

    pub fn insert_conflict(&self, conflict: &Conflict) -> Result<(), DbError> {
        self.conn_ref().execute(
            "INSERT INTO conflicts (
                id, board_id, conflict_type, severity, status, fingerprint,
                summary, detail, affected_tasks, affected_users,
                detected_at, last_seen_at, resolved_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                conflict.id,
                conflict.board_id,
                conflict.conflict_type.as_str(),
                conflict.severity.as_str(),
                conflict.status.as_str(),
                conflict.fingerprint,
                conflict.summary,
                conflict.detail,
                serde_json::to_string(&conflict.affected_tasks)?,
                serde_json::to_string(&conflict.affected_users)?,
                conflict.detected_at,
                conflict.last_seen_at,
                conflict.resolved_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_conflict(&self, id: &str) -> Result<Option<Conflict>, DbError> {
        let mut stmt = self
            .conn_ref()
            .prepare(&format!("SELECT {CONFLICT_COLS} FROM conflicts WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], map_conflict)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Open conflicts (active or acknowledged) for one board.
    pub fn open_conflicts(&self, board_id: &str) -> Result<Vec<Conflict>, DbError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {CONFLICT_COLS} FROM conflicts
             WHERE board_id = ?1 AND status IN ('active', 'acknowledged')
             ORDER BY detected_at"
        ))?;
        let rows = stmt.query_map(params![board_id], map_conflict)?;
        let mut conflicts = Vec::new();
        for row in rows {
            conflicts.push(row?);
        }
        Ok(conflicts)
    }

    /// Conflicts for one board filtered by status, most severe first.
    pub fn conflicts_by_status(
        &self,
        board_id: &str,
        status: ConflictStatus,
    ) -> Result<Vec<Conflict>, DbError> {
        let mut stmt = self.conn_ref().prepare(&format!(
            "SELECT {CONFLICT_COLS} FROM conflicts
             WHERE board_id = ?1 AND status = ?2
             ORDER BY
               CASE severity
                 WHEN 'critical' THEN 0
                 WHEN 'high' THEN 1
                 WHEN 'medium' THEN 2
                 ELSE 3
               END,
               detected_at DESC"
        ))?;
        let rows = stmt.query_map(params![board_id, status.as_str()], map_conflict)?;
        let mut conflicts = Vec::new();
        for row in rows {
            conflicts.push(row?);
        }
        Ok(conflicts)
    }

    /// Refresh `last_seen_at` for a conflict re-observed by a scan.
    pub fn touch_conflict(&self, id: &str, seen_at: &str) -> Result<(), DbError> {
        self.conn_ref().execute(
            "UPDATE conflicts SET last_seen_at = ?1 WHERE id = ?2",
            params![seen_at, id],
        )?;
        Ok(())
    }

    /// Transition a conflict's status. Sets `resolved_at` when the conflict
    /// leaves the open state and clears it when it re-enters.
    /// Returns false if no conflict with the id exists.
    pub fn set_conflict_status(&self, id: &str, status: ConflictStatus) -> Result<bool, DbError> {
        let now = Utc::now().to_rfc3339();
        let resolved_at: Option<String> = if status.is_open() { None } else { Some(now) };
        let changed = self.conn_ref().execute(
            "UPDATE conflicts SET status = ?1, resolved_at = ?2 WHERE id = ?3",
            params![status.as_str(), resolved_at, id],
        )?;
        Ok(changed > 0)
    }

    /// Delete resolved/ignored conflicts closed before the cutoff timestamp.
    /// Dependent resolutions and feedback events cascade. Pattern aggregates
    /// are untouched; learning outlives the conflicts it came from.
    pub fn purge_closed_conflicts(&self, cutoff_rfc3339: &str) -> Result<usize, DbError> {
        let deleted = self.conn_ref().execute(
            "DELETE FROM conflicts
             WHERE status IN ('resolved', 'ignored')
               AND resolved_at IS NOT NULL
               AND resolved_at < ?1",
            params![cutoff_rfc3339],
        )?;
        Ok(deleted)
    }

    // =========================================================================
    // Resolutions
    // =========================================================================

    pub fn insert_resolution(&self, resolution: &Resolution) -> Result<(), DbError> {
        self.conn_ref().execute(
            "INSERT INTO resolutions (
                id, conflict_id, resolution_type, steps, impact_summary, impact_days,
                base_confidence, learned_adjustment, final_confidence,
                times_suggested, times_accepted, superseded, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                resolution.id,
                resolution.conflict_id,
                resolution.resolution_type.as_str(),
                serde_json::to_string(&resolution.steps)?,
                resolution.impact_summary,
                resolution.impact_days,
                resolution.base_confidence,
                resolution.learned_adjustment,
                resolution.final_confidence,
                resolution.times_suggested,
                resolution.times_accepted,
                resolution.superseded,
                resolution.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_resolution(&self, id: &str) -> Result<Option<Resolution>, DbError> {
        let mut stmt = self
            .conn_ref()
            .prepare(&format!("SELECT {RESOLUTION_COLS} FROM resolutions WHERE id = ?1"))?;
        let mut rows = stmt.query_map(params![id], map_resolution)?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }

    /// Live (or all) resolutions for a conflict, strongest first.
    pub fn resolutions_for_conflict(
        &self,
        conflict_id: &str,
        include_superseded: bool,
    ) -> Result<Vec<Resolution>, DbError> {
        let sql = if include_superseded {
            format!(
                "SELECT {RESOLUTION_COLS} FROM resolutions
                 WHERE conflict_id = ?1
                 ORDER BY superseded, final_confidence DESC, rowid"
            )
        } else {
            format!(
                "SELECT {RESOLUTION_COLS} FROM resolutions
                 WHERE conflict_id = ?1 AND superseded = 0
                 ORDER BY final_confidence DESC, rowid"
            )
        };
        let mut stmt = self.conn_ref().prepare(&sql)?;
        let rows = stmt.query_map(params![conflict_id], map_resolution)?;
        let mut resolutions = Vec::new();
        for row in rows {
            resolutions.push(row?);
        }
        Ok(resolutions)
    }

    /// Mark every live resolution for a conflict as superseded.
    /// Rows are kept; suggestion history is never destroyed by a re-suggest.
    pub fn supersede_resolutions(&self, conflict_id: &str) -> Result<usize, DbError> {
        let changed = self.conn_ref().execute(
            "UPDATE resolutions SET superseded = 1 WHERE conflict_id = ?1 AND superseded = 0",
            params![conflict_id],
        )?;
        Ok(changed)
    }

    pub fn record_resolution_accepted(&self, id: &str) -> Result<(), DbError> {
        self.conn_ref().execute(
            "UPDATE resolutions SET times_accepted = times_accepted + 1 WHERE id = ?1",
            params![id],
        )?;
        Ok(())
    }

    // =========================================================================
    // Scan state
    // =========================================================================

    pub fn upsert_scan_state(&self, board_id: &str, conflict_count: i64) -> Result<(), DbError> {
        let now = Utc::now().to_rfc3339();
        self.conn_ref().execute(
            "INSERT INTO scan_state (board_id, last_scan_at, last_conflict_count)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(board_id) DO UPDATE SET
                last_scan_at = excluded.last_scan_at,
                last_conflict_count = excluded.last_conflict_count",
            params![board_id, now, conflict_count],
        )?;
        Ok(())
    }

    pub fn get_scan_state(&self, board_id: &str) -> Result<Option<ScanStateRow>, DbError> {
        let mut stmt = self.conn_ref().prepare(
            "SELECT board_id, last_scan_at, last_conflict_count FROM scan_state WHERE board_id = ?1",
        )?;
        let mut rows = stmt.query_map(params![board_id], |row| {
            Ok(ScanStateRow {
                board_id: row.get(0)?,
                last_scan_at: row.get(1)?,
                last_conflict_count: row.get(2)?,
            })
        })?;
        match rows.next() {
            Some(row) => Ok(Some(row?)),
            None => Ok(None),
        }
    }
}
