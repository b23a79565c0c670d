//! Row types that don't map one-to-one onto the domain model.

use serde::Serialize;

/// A row from the `patterns` table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternRow {
    pub conflict_type: String,
    pub resolution_type: String,
    /// "global" or a board id.
    pub scope: String,
    pub times_used: u64,
    pub times_successful: u64,
}

/// A row from the `scan_state` table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStateRow {
    pub board_id: String,
    pub last_scan_at: String,
    pub last_conflict_count: i64,
}
