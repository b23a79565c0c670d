//! Read and triage surface over stored conflicts.

use crate::db::EngineDb;
use crate::error::EngineError;
use crate::types::{Conflict, ConflictStatus, Resolution};

/// One conflict by id.
pub fn get_conflict(db: &EngineDb, conflict_id: &str) -> Result<Conflict, EngineError> {
    db.get_conflict(conflict_id)?
        .ok_or_else(|| EngineError::not_found("conflict", conflict_id))
}

/// Open conflicts (active or acknowledged) for a board, oldest first.
pub fn list_open_conflicts(db: &EngineDb, board_id: &str) -> Result<Vec<Conflict>, EngineError> {
    Ok(db.open_conflicts(board_id)?)
}

/// Conflicts for a board in one specific status, most severe first.
pub fn list_conflicts_by_status(
    db: &EngineDb,
    board_id: &str,
    status: ConflictStatus,
) -> Result<Vec<Conflict>, EngineError> {
    Ok(db.conflicts_by_status(board_id, status)?)
}

/// Current (non-superseded) resolutions for a conflict, best first.
pub fn get_resolutions(db: &EngineDb, conflict_id: &str) -> Result<Vec<Resolution>, EngineError> {
    db.get_conflict(conflict_id)?
        .ok_or_else(|| EngineError::not_found("conflict", conflict_id))?;
    Ok(db.resolutions_for_conflict(conflict_id, false)?)
}

/// Full suggestion history for a conflict, superseded candidates included.
pub fn get_resolution_history(
    db: &EngineDb,
    conflict_id: &str,
) -> Result<Vec<Resolution>, EngineError> {
    db.get_conflict(conflict_id)?
        .ok_or_else(|| EngineError::not_found("conflict", conflict_id))?;
    Ok(db.resolutions_for_conflict(conflict_id, true)?)
}

/// Mark a conflict as seen by a human. It stays open and keeps matching its
/// fingerprint on later scans.
pub fn acknowledge_conflict(db: &EngineDb, conflict_id: &str) -> Result<Conflict, EngineError> {
    set_status(db, conflict_id, ConflictStatus::Acknowledged)
}

/// Ignore a conflict. It closes immediately; if the underlying condition
/// persists, the next scan opens a fresh conflict for the same fingerprint.
pub fn dismiss_conflict(db: &EngineDb, conflict_id: &str) -> Result<Conflict, EngineError> {
    set_status(db, conflict_id, ConflictStatus::Ignored)
}

fn set_status(
    db: &EngineDb,
    conflict_id: &str,
    status: ConflictStatus,
) -> Result<Conflict, EngineError> {
    let conflict = db
        .get_conflict(conflict_id)?
        .ok_or_else(|| EngineError::not_found("conflict", conflict_id))?;
    if !conflict.status.is_open() {
        return Err(EngineError::Logic(format!(
            "conflict {conflict_id} is already {:?} and cannot move to {:?}",
            conflict.status, status
        )));
    }
    db.set_conflict_status(conflict_id, status)?;
    db.get_conflict(conflict_id)?
        .ok_or_else(|| EngineError::not_found("conflict", conflict_id))
}
