//! Scan orchestration: snapshot, detect, reconcile, notify.
//!
//! One scan reads a board snapshot, runs the detection passes, and reconciles
//! the findings against the stored open conflicts inside a single
//! transaction. Matching fingerprints are refreshed, new fingerprints are
//! inserted with suggested resolutions, and open conflicts the scan no longer
//! observes are closed as self-resolved. Notifications go out only after the
//! transaction has committed.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::db::EngineDb;
use crate::detect::{detect, DetectorContext, PassError};
use crate::error::EngineError;
use crate::learn::PatternLearner;
use crate::notify::Notifier;
use crate::snapshot::{validate, SnapshotReader};
use crate::suggest::Suggester;
use crate::types::{Conflict, ConflictStatus, ConflictType, Resolution, Snapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoardPhase {
    Idle,
    Scanning,
    Reconciling,
}

/// What one board scan did.
#[derive(Debug, Default)]
pub struct ScanReport {
    pub board_id: String,
    pub new_conflicts: usize,
    pub refreshed: usize,
    pub self_resolved: usize,
    pub pass_errors: usize,
    pub open_total: usize,
}

/// Aggregate outcome of scanning a set of boards.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub reports: Vec<ScanReport>,
    /// Boards whose scan failed, with the error message.
    pub failed: Vec<(String, String)>,
}

/// External request to scan outside the regular interval.
#[derive(Debug)]
pub enum ScanTrigger {
    Board(String),
    All,
}

/// Cloneable sender half for on-demand scan requests.
#[derive(Clone)]
pub struct ScanHandle {
    tx: mpsc::Sender<ScanTrigger>,
}

impl ScanHandle {
    pub async fn trigger(&self, trigger: ScanTrigger) -> Result<(), EngineError> {
        self.tx
            .send(trigger)
            .await
            .map_err(|_| EngineError::Transient("scan loop is not running".to_string()))
    }

    /// Shorthand for requesting one board's scan.
    pub async fn trigger_board(&self, board_id: &str) -> Result<(), EngineError> {
        self.trigger(ScanTrigger::Board(board_id.to_string())).await
    }
}

pub fn scan_channel() -> (ScanHandle, mpsc::Receiver<ScanTrigger>) {
    let (tx, rx) = mpsc::channel(32);
    (ScanHandle { tx }, rx)
}

pub struct Orchestrator {
    config: EngineConfig,
    db: Arc<Mutex<EngineDb>>,
    reader: Arc<dyn SnapshotReader>,
    notifier: Arc<dyn Notifier>,
    suggester: Suggester,
    learner: Arc<PatternLearner>,
    phases: DashMap<String, BoardPhase>,
}

/// Resets a board to Idle when a scan exits, on success or failure.
struct PhaseGuard<'a> {
    phases: &'a DashMap<String, BoardPhase>,
    board_id: String,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.phases.insert(self.board_id.clone(), BoardPhase::Idle);
    }
}

impl Orchestrator {
    pub fn new(
        config: EngineConfig,
        db: Arc<Mutex<EngineDb>>,
        reader: Arc<dyn SnapshotReader>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, EngineError> {
        let learner = Arc::new(PatternLearner::new(config.learning.clone(), db.clone()));
        let loaded = learner.load()?;
        log::info!("pattern learner warmed with {loaded} stored pattern keys");
        Ok(Self {
            suggester: Suggester::new(config.suggestion.clone()),
            config,
            db,
            reader,
            notifier,
            learner,
            phases: DashMap::new(),
        })
    }

    /// The learner backing this orchestrator. Feedback recorded through it is
    /// picked up by the next suggestion pass without any reload.
    pub fn learner(&self) -> &Arc<PatternLearner> {
        &self.learner
    }

    /// Scan one board end to end.
    pub async fn scan_board(&self, board_id: &str) -> Result<ScanReport, EngineError> {
        self.enter_phase(board_id, BoardPhase::Scanning)?;
        let _guard = PhaseGuard {
            phases: &self.phases,
            board_id: board_id.to_string(),
        };

        let timeout = Duration::from_secs(self.config.scan.board_timeout_secs);
        let snapshot = tokio::time::timeout(timeout, self.reader.read_snapshot(board_id))
            .await
            .map_err(|_| EngineError::SnapshotTimeout {
                board_id: board_id.to_string(),
                seconds: self.config.scan.board_timeout_secs,
            })??;
        validate(&snapshot)?;

        let ctx = DetectorContext::new(Utc::now().date_naive(), self.config.detection.clone());
        let output = detect(&snapshot, &ctx);

        self.phases.insert(board_id.to_string(), BoardPhase::Reconciling);
        let (report, to_notify) =
            self.reconcile(board_id, &snapshot, output.conflicts, &output.pass_errors)?;

        for (conflict, resolutions) in to_notify {
            if let Err(e) = self
                .notifier
                .notify(&conflict, &conflict.affected_users, &resolutions)
                .await
            {
                log::warn!("notification for conflict {} failed: {e}", conflict.id);
            }
        }

        log::info!(
            "board {board_id}: {} new, {} refreshed, {} self-resolved, {} open",
            report.new_conflicts,
            report.refreshed,
            report.self_resolved,
            report.open_total
        );
        Ok(report)
    }

    fn enter_phase(&self, board_id: &str, phase: BoardPhase) -> Result<(), EngineError> {
        use dashmap::mapref::entry::Entry;
        match self.phases.entry(board_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if *occupied.get() != BoardPhase::Idle {
                    return Err(EngineError::Transient(format!(
                        "scan already in progress for board {board_id}"
                    )));
                }
                occupied.insert(phase);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(phase);
            }
        }
        Ok(())
    }

    /// Fold one detection run into the stored conflicts for a board.
    ///
    /// Open conflicts belonging to a failed pass are left untouched: that
    /// pass produced no findings this scan, so their absence says nothing
    /// about whether the underlying condition cleared.
    #[allow(clippy::type_complexity)]
    fn reconcile(
        &self,
        board_id: &str,
        snapshot: &Snapshot,
        detected: Vec<Conflict>,
        pass_errors: &[PassError],
    ) -> Result<(ScanReport, Vec<(Conflict, Vec<Resolution>)>), EngineError> {
        let failed_types: std::collections::HashSet<ConflictType> =
            pass_errors.iter().map(|e| e.conflict_type).collect();
        let mut report = ScanReport {
            board_id: board_id.to_string(),
            pass_errors: pass_errors.len(),
            ..ScanReport::default()
        };
        let mut to_notify = Vec::new();
        let now = Utc::now().to_rfc3339();

        let db = self.db.lock();
        db.with_transaction(|db| {
            let open = db.open_conflicts(board_id)?;
            let mut unseen: std::collections::HashMap<&str, &Conflict> =
                open.iter().map(|c| (c.fingerprint.as_str(), c)).collect();

            for conflict in detected {
                if let Some(existing) = unseen.remove(conflict.fingerprint.as_str()) {
                    db.touch_conflict(&existing.id, &now)?;
                    report.refreshed += 1;
                    continue;
                }
                db.insert_conflict(&conflict)?;
                let resolutions = self.suggester.suggest(&conflict, snapshot, &self.learner);
                for resolution in &resolutions {
                    db.insert_resolution(resolution)?;
                }
                report.new_conflicts += 1;
                to_notify.push((conflict, resolutions));
            }

            // A condition that disappeared between scans resolved itself;
            // the remaining open conflicts simply closed without feedback.
            let mut preserved = 0;
            for vanished in unseen.values() {
                if failed_types.contains(&vanished.conflict_type) {
                    log::warn!(
                        "keeping conflict {} open: its {} pass failed this scan",
                        vanished.id,
                        vanished.conflict_type.as_str()
                    );
                    preserved += 1;
                    continue;
                }
                db.set_conflict_status(&vanished.id, ConflictStatus::Resolved)?;
                report.self_resolved += 1;
            }

            report.open_total = report.new_conflicts + report.refreshed + preserved;
            db.upsert_scan_state(board_id, report.open_total as i64)?;
            Ok(())
        })?;

        Ok((report, to_notify))
    }

    /// Replace a conflict's live suggestions with a freshly computed set.
    /// The old candidates are kept as superseded history.
    pub fn resuggest_conflict(
        &self,
        conflict_id: &str,
        snapshot: &Snapshot,
    ) -> Result<Vec<Resolution>, EngineError> {
        let db = self.db.lock();
        let conflict = db
            .get_conflict(conflict_id)?
            .ok_or_else(|| EngineError::not_found("conflict", conflict_id))?;
        if !conflict.status.is_open() {
            return Err(EngineError::Logic(format!(
                "conflict {conflict_id} is closed; nothing to re-suggest"
            )));
        }

        let resolutions = self.suggester.suggest(&conflict, snapshot, &self.learner);
        db.with_transaction(|db| {
            db.supersede_resolutions(conflict_id)?;
            for resolution in &resolutions {
                db.insert_resolution(resolution)?;
            }
            Ok(())
        })?;
        Ok(resolutions)
    }

    /// Scan every board concurrently, one task per board.
    pub async fn run_cycle(self: &Arc<Self>, boards: &[String]) -> CycleReport {
        let mut handles = Vec::with_capacity(boards.len());
        for board_id in boards {
            let this = Arc::clone(self);
            let board_id = board_id.clone();
            handles.push((
                board_id.clone(),
                tokio::spawn(async move { this.scan_board(&board_id).await }),
            ));
        }

        let mut cycle = CycleReport::default();
        for (board_id, handle) in handles {
            match handle.await {
                Ok(Ok(report)) => cycle.reports.push(report),
                Ok(Err(e)) => {
                    if e.is_transient() {
                        log::warn!("scan of board {board_id} failed transiently: {e}");
                    } else {
                        log::error!("scan of board {board_id} failed: {e}");
                    }
                    cycle.failed.push((board_id, e.to_string()));
                }
                Err(join_err) => {
                    log::error!("scan task for board {board_id} panicked: {join_err}");
                    cycle.failed.push((board_id, join_err.to_string()));
                }
            }
        }
        cycle
    }

    /// Delete resolved and ignored conflicts that closed before the retention
    /// window. Learned pattern aggregates are untouched.
    pub fn sweep_retention(&self) -> Result<usize, EngineError> {
        let cutoff =
            (Utc::now() - chrono::Duration::days(self.config.scan.retention_days)).to_rfc3339();
        let purged = self.db.lock().purge_closed_conflicts(&cutoff)?;
        if purged > 0 {
            log::info!("retention sweep purged {purged} closed conflicts");
        }
        Ok(purged)
    }

    /// Run the periodic scan loop until the trigger channel closes.
    pub async fn run(self: Arc<Self>, boards: Vec<String>, mut triggers: mpsc::Receiver<ScanTrigger>) {
        let mut scan_tick =
            tokio::time::interval(Duration::from_secs(self.config.scan.interval_secs.max(1)));
        let sweep_secs = self.config.scan.retention_sweep_hours.max(1) as u64 * 3600;
        let mut sweep_tick = tokio::time::interval(Duration::from_secs(sweep_secs));
        // Both intervals fire immediately on the first tick; burn the sweep's
        // so startup does one scan cycle, not a scan plus a purge race.
        sweep_tick.tick().await;

        loop {
            tokio::select! {
                _ = scan_tick.tick() => {
                    self.run_cycle(&boards).await;
                }
                _ = sweep_tick.tick() => {
                    if let Err(e) = self.sweep_retention() {
                        log::warn!("retention sweep failed: {e}");
                    }
                }
                trigger = triggers.recv() => {
                    match trigger {
                        Some(ScanTrigger::Board(board_id)) => {
                            if let Err(e) = self.scan_board(&board_id).await {
                                log::warn!("triggered scan of board {board_id} failed: {e}");
                            }
                        }
                        Some(ScanTrigger::All) => {
                            self.run_cycle(&boards).await;
                        }
                        None => {
                            log::info!("scan trigger channel closed; stopping scan loop");
                            break;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::db::test_utils::test_db;
    use crate::detect::test_fixtures::*;
    use crate::notify::NullNotifier;
    use crate::types::{Severity, Task};

    /// Serves a fixed snapshot per board; swap the content between scans.
    struct FixedReader {
        snapshots: Mutex<std::collections::HashMap<String, Snapshot>>,
    }

    impl FixedReader {
        fn new() -> Self {
            Self {
                snapshots: Mutex::new(std::collections::HashMap::new()),
            }
        }

        fn set(&self, board_id: &str, snapshot: Snapshot) {
            self.snapshots.lock().insert(board_id.to_string(), snapshot);
        }
    }

    #[async_trait]
    impl SnapshotReader for FixedReader {
        async fn read_snapshot(&self, board_id: &str) -> Result<Snapshot, EngineError> {
            self.snapshots
                .lock()
                .get(board_id)
                .cloned()
                .ok_or_else(|| EngineError::Transient(format!("no snapshot for {board_id}")))
        }
    }

    struct HangingReader;

    #[async_trait]
    impl SnapshotReader for HangingReader {
        async fn read_snapshot(&self, _board_id: &str) -> Result<Snapshot, EngineError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(EngineError::Transient("unreachable".to_string()))
        }
    }

    struct RecordingNotifier {
        notified: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            conflict: &Conflict,
            _users: &[String],
            _resolutions: &[Resolution],
        ) -> Result<(), String> {
            self.notified.lock().push(conflict.fingerprint.clone());
            Ok(())
        }
    }

    fn overlap_tasks() -> Vec<Task> {
        vec![
            task("t1", "u1", Some(date(2025, 6, 1)), Some(date(2025, 6, 10))),
            task("t2", "u1", Some(date(2025, 6, 5)), Some(date(2025, 6, 15))),
        ]
    }

    fn board_snapshot(board_id: &str, tasks: Vec<Task>) -> Snapshot {
        let mut snap = snapshot(tasks);
        snap.board_id = board_id.to_string();
        snap
    }

    fn orchestrator(reader: Arc<dyn SnapshotReader>, notifier: Arc<dyn Notifier>) -> Arc<Orchestrator> {
        let db = Arc::new(Mutex::new(test_db()));
        Arc::new(
            Orchestrator::new(EngineConfig::default(), db, reader, notifier).expect("orchestrator"),
        )
    }

    #[tokio::test]
    async fn test_first_scan_persists_conflicts_and_resolutions() {
        let reader = Arc::new(FixedReader::new());
        reader.set("b1", board_snapshot("b1", overlap_tasks()));
        let orch = orchestrator(reader.clone(), Arc::new(NullNotifier));

        let report = orch.scan_board("b1").await.expect("scan");
        assert!(report.new_conflicts >= 1);
        assert_eq!(report.refreshed, 0);
        assert_eq!(report.self_resolved, 0);

        let db = orch.db.lock();
        let open = db.open_conflicts("b1").expect("open");
        assert_eq!(open.len(), report.new_conflicts);
        for conflict in &open {
            let resolutions = db.resolutions_for_conflict(&conflict.id, false).expect("res");
            assert!(!resolutions.is_empty(), "every new conflict gets suggestions");
        }
        let state = db.get_scan_state("b1").expect("state").expect("exists");
        assert_eq!(state.last_conflict_count as usize, report.open_total);
    }

    #[tokio::test]
    async fn test_second_scan_refreshes_instead_of_duplicating() {
        let reader = Arc::new(FixedReader::new());
        reader.set("b1", board_snapshot("b1", overlap_tasks()));
        let orch = orchestrator(reader.clone(), Arc::new(NullNotifier));

        let first = orch.scan_board("b1").await.expect("first");
        let second = orch.scan_board("b1").await.expect("second");

        assert_eq!(second.new_conflicts, 0);
        assert_eq!(second.refreshed, first.new_conflicts);

        let open = orch.db.lock().open_conflicts("b1").expect("open");
        assert_eq!(open.len(), first.new_conflicts, "no duplicate rows");
    }

    #[tokio::test]
    async fn test_vanished_conflict_self_resolves() {
        let reader = Arc::new(FixedReader::new());
        reader.set("b1", board_snapshot("b1", overlap_tasks()));
        let orch = orchestrator(reader.clone(), Arc::new(NullNotifier));

        let first = orch.scan_board("b1").await.expect("first");
        assert!(first.new_conflicts >= 1);

        // The overlap disappears from the next snapshot
        reader.set("b1", board_snapshot("b1", vec![]));
        let second = orch.scan_board("b1").await.expect("second");
        assert_eq!(second.self_resolved, first.new_conflicts);

        let db = orch.db.lock();
        assert!(db.open_conflicts("b1").expect("open").is_empty());
        let resolved = db
            .conflicts_by_status("b1", ConflictStatus::Resolved)
            .expect("resolved");
        assert_eq!(resolved.len(), first.new_conflicts);
        assert!(resolved.iter().all(|c| c.resolved_at.is_some()));
    }

    #[tokio::test]
    async fn test_notifier_called_for_new_conflicts_only() {
        let reader = Arc::new(FixedReader::new());
        reader.set("b1", board_snapshot("b1", overlap_tasks()));
        let notifier = Arc::new(RecordingNotifier {
            notified: Mutex::new(Vec::new()),
        });
        let orch = orchestrator(reader.clone(), notifier.clone());

        let first = orch.scan_board("b1").await.expect("first");
        orch.scan_board("b1").await.expect("second");

        assert_eq!(notifier.notified.lock().len(), first.new_conflicts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_timeout() {
        let orch = orchestrator(Arc::new(HangingReader), Arc::new(NullNotifier));

        let err = orch.scan_board("b1").await.unwrap_err();
        assert!(matches!(err, EngineError::SnapshotTimeout { .. }));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_invalid_snapshot_rejected() {
        let reader = Arc::new(FixedReader::new());
        let mut bad = board_snapshot("b1", overlap_tasks());
        bad.tasks.push(task("t1", "u2", None, None)); // duplicate id
        reader.set("b1", bad);
        let orch = orchestrator(reader, Arc::new(NullNotifier));

        let err = orch.scan_board("b1").await.unwrap_err();
        assert!(matches!(err, EngineError::DataIntegrity(_)));
    }

    #[tokio::test]
    async fn test_concurrent_scan_rejected() {
        let reader = Arc::new(FixedReader::new());
        reader.set("b1", board_snapshot("b1", vec![]));
        let orch = orchestrator(reader, Arc::new(NullNotifier));

        orch.phases.insert("b1".to_string(), BoardPhase::Scanning);
        let err = orch.scan_board("b1").await.unwrap_err();
        assert!(matches!(err, EngineError::Transient(_)));

        // After the stale marker clears, scanning works again
        orch.phases.insert("b1".to_string(), BoardPhase::Idle);
        orch.scan_board("b1").await.expect("scan");
    }

    #[tokio::test]
    async fn test_run_cycle_isolates_board_failures() {
        let reader = Arc::new(FixedReader::new());
        reader.set("good", board_snapshot("good", overlap_tasks()));
        // "bad" has no snapshot; its scan fails transiently
        let orch = orchestrator(reader, Arc::new(NullNotifier));

        let cycle = orch
            .run_cycle(&["good".to_string(), "bad".to_string()])
            .await;
        assert_eq!(cycle.reports.len(), 1);
        assert_eq!(cycle.failed.len(), 1);
        assert_eq!(cycle.failed[0].0, "bad");
    }

    #[tokio::test]
    async fn test_failed_pass_keeps_its_open_conflicts() {
        let orch = orchestrator(Arc::new(FixedReader::new()), Arc::new(NullNotifier));
        let mk = |id: &str, conflict_type: ConflictType, fp: &str| {
            let now = Utc::now().to_rfc3339();
            Conflict {
                id: id.to_string(),
                board_id: "b1".to_string(),
                conflict_type,
                severity: Severity::Medium,
                status: ConflictStatus::Active,
                fingerprint: fp.to_string(),
                summary: "seeded".to_string(),
                detail: String::new(),
                affected_tasks: vec!["t1".to_string()],
                affected_users: vec!["u1".to_string()],
                detected_at: now.clone(),
                last_seen_at: now,
                resolved_at: None,
            }
        };
        {
            let db = orch.db.lock();
            db.insert_conflict(&mk("cf-res", ConflictType::Resource, "fp-res")).expect("insert");
            db.insert_conflict(&mk("cf-sch", ConflictType::Schedule, "fp-sch")).expect("insert");
        }

        // The resource pass failed and produced nothing; the schedule pass
        // ran clean and genuinely no longer sees its conflict.
        let snap = board_snapshot("b1", vec![]);
        let errors = vec![PassError {
            pass: "resource",
            conflict_type: ConflictType::Resource,
            message: "store hiccup".to_string(),
        }];
        let (report, _) = orch.reconcile("b1", &snap, Vec::new(), &errors).expect("reconcile");

        assert_eq!(report.pass_errors, 1);
        assert_eq!(report.self_resolved, 1, "only the healthy pass's conflict closes");
        assert_eq!(report.open_total, 1, "the preserved conflict still counts as open");

        let db = orch.db.lock();
        let res = db.get_conflict("cf-res").expect("get").expect("exists");
        assert_eq!(res.status, ConflictStatus::Active, "failed pass must not self-resolve");
        let sch = db.get_conflict("cf-sch").expect("get").expect("exists");
        assert_eq!(sch.status, ConflictStatus::Resolved);
    }

    #[tokio::test]
    async fn test_resuggest_supersedes_old_candidates() {
        let reader = Arc::new(FixedReader::new());
        let snap = board_snapshot("b1", overlap_tasks());
        reader.set("b1", snap.clone());
        let orch = orchestrator(reader, Arc::new(NullNotifier));

        orch.scan_board("b1").await.expect("scan");
        let conflict_id = {
            let db = orch.db.lock();
            db.open_conflicts("b1").expect("open")[0].id.clone()
        };

        let fresh = orch.resuggest_conflict(&conflict_id, &snap).expect("resuggest");
        assert!(!fresh.is_empty());

        let db = orch.db.lock();
        let live = db.resolutions_for_conflict(&conflict_id, false).expect("live");
        assert_eq!(live.len(), fresh.len());
        let all = db.resolutions_for_conflict(&conflict_id, true).expect("all");
        assert!(all.len() > live.len(), "old candidates kept as history");
    }

    #[tokio::test]
    async fn test_resuggest_missing_conflict() {
        let orch = orchestrator(Arc::new(FixedReader::new()), Arc::new(NullNotifier));
        let snap = board_snapshot("b1", vec![]);
        let err = orch.resuggest_conflict("cf-missing", &snap).unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_retention_sweep_purges_old_closed() {
        let reader = Arc::new(FixedReader::new());
        reader.set("b1", board_snapshot("b1", overlap_tasks()));
        let orch = orchestrator(reader.clone(), Arc::new(NullNotifier));

        orch.scan_board("b1").await.expect("first");
        reader.set("b1", board_snapshot("b1", vec![]));
        orch.scan_board("b1").await.expect("second");

        // Backdate the self-resolved conflicts past the retention window
        orch.db
            .lock()
            .conn_ref()
            .execute(
                "UPDATE conflicts SET resolved_at = '2020-01-01T00:00:00+00:00'
                 WHERE status = 'resolved'",
                [],
            )
            .expect("backdate");

        let purged = orch.sweep_retention().expect("sweep");
        assert!(purged >= 1);
        assert!(orch
            .db
            .lock()
            .conflicts_by_status("b1", ConflictStatus::Resolved)
            .expect("resolved")
            .is_empty());
    }
}
