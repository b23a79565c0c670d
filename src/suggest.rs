//! Resolution suggester: candidate fixes for a detected conflict.
//!
//! Each conflict type has a menu of resolution strategies. Base confidence is
//! a deterministic function of the conflict and snapshot, then the learner's
//! adjustment for that (conflict type, resolution type, board) pairing is
//! added and the result clamped to 0..=100. Ties on final confidence break by
//! strategy rank so output order never depends on map iteration.

use chrono::Utc;

use crate::config::SuggestionConfig;
use crate::learn::PatternLearner;
use crate::types::{Conflict, ConflictType, Resolution, ResolutionType, Severity, Snapshot, Task};

pub struct Suggester {
    config: SuggestionConfig,
}

struct Candidate {
    resolution_type: ResolutionType,
    base_confidence: u8,
    steps: Vec<String>,
    impact_summary: String,
    impact_days: Option<f64>,
}

impl Suggester {
    pub fn new(config: SuggestionConfig) -> Self {
        Self { config }
    }

    /// Build the ranked candidate list for one conflict.
    pub fn suggest(
        &self,
        conflict: &Conflict,
        snapshot: &Snapshot,
        learner: &PatternLearner,
    ) -> Vec<Resolution> {
        if conflict.board_id != snapshot.board_id {
            debug_assert!(false, "conflict/snapshot board mismatch");
            log::error!(
                "conflict {} is for board {} but snapshot is for board {}",
                conflict.id,
                conflict.board_id,
                snapshot.board_id
            );
            return vec![self.build(conflict, learner, self.manual_review(conflict))];
        }

        let mut candidates = match conflict.conflict_type {
            ConflictType::Resource => resource_candidates(conflict, snapshot, &self.config),
            ConflictType::Schedule => schedule_candidates(conflict, snapshot),
            ConflictType::Dependency => dependency_candidates(conflict, snapshot),
        };
        if candidates.is_empty() {
            candidates.push(self.manual_review(conflict));
        }

        let mut resolutions: Vec<Resolution> = candidates
            .into_iter()
            .map(|c| self.build(conflict, learner, c))
            .collect();
        resolutions.sort_by(|a, b| {
            b.final_confidence
                .cmp(&a.final_confidence)
                .then_with(|| a.resolution_type.priority_rank().cmp(&b.resolution_type.priority_rank()))
        });
        resolutions.truncate(self.config.max_candidates);
        resolutions
    }

    fn build(&self, conflict: &Conflict, learner: &PatternLearner, c: Candidate) -> Resolution {
        let adjustment =
            learner.adjustment_for(conflict.conflict_type, c.resolution_type, &conflict.board_id);
        let final_confidence =
            (i16::from(c.base_confidence) + i16::from(adjustment)).clamp(0, 100) as u8;
        Resolution {
            id: format!("rs-{}", uuid::Uuid::new_v4()),
            conflict_id: conflict.id.clone(),
            resolution_type: c.resolution_type,
            steps: c.steps,
            impact_summary: c.impact_summary,
            impact_days: c.impact_days,
            base_confidence: c.base_confidence,
            learned_adjustment: adjustment,
            final_confidence,
            times_suggested: 1,
            times_accepted: 0,
            superseded: false,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    fn manual_review(&self, conflict: &Conflict) -> Candidate {
        Candidate {
            resolution_type: ResolutionType::ManualReview,
            base_confidence: self.config.fallback_confidence,
            steps: vec![format!(
                "Review conflict '{}' with the affected users and decide a course of action",
                conflict.summary
            )],
            impact_summary: "Requires a human decision before any plan change".to_string(),
            impact_days: None,
        }
    }
}

fn affected_tasks<'a>(conflict: &Conflict, snapshot: &'a Snapshot) -> Vec<&'a Task> {
    conflict
        .affected_tasks
        .iter()
        .filter_map(|id| snapshot.task(id))
        .collect()
}

fn max_complexity(tasks: &[&Task]) -> u8 {
    tasks.iter().map(|t| t.complexity).max().unwrap_or(0)
}

/// A user on the board with spare capacity who is not already tangled in
/// this conflict, if any. Deterministic: first by user id.
fn spare_user(conflict: &Conflict, snapshot: &Snapshot, max_active: usize) -> Option<String> {
    let mut assignments: Vec<_> = snapshot.assignments.iter().collect();
    assignments.sort_by(|a, b| a.user_id.cmp(&b.user_id));
    assignments
        .iter()
        .find(|a| {
            !conflict.affected_users.contains(&a.user_id)
                && a.task_ids
                    .iter()
                    .filter_map(|id| snapshot.task(id))
                    .filter(|t| !t.status.is_terminal())
                    .count()
                    < max_active
        })
        .map(|a| a.user_id.clone())
}

fn resource_candidates(
    conflict: &Conflict,
    snapshot: &Snapshot,
    config: &SuggestionConfig,
) -> Vec<Candidate> {
    let tasks = affected_tasks(conflict, snapshot);
    let first = tasks.first().map(|t| t.title.clone()).unwrap_or_default();
    let mut out = Vec::new();

    let mut reassign_base = 60;
    let reassign_target = spare_user(conflict, snapshot, config.spare_task_threshold);
    if reassign_target.is_some() {
        reassign_base += 10;
    }
    let target_step = match &reassign_target {
        Some(user) => format!("Reassign '{first}' to {user}"),
        None => format!("Reassign '{first}' to a user with spare capacity"),
    };
    out.push(Candidate {
        resolution_type: ResolutionType::Reassign,
        base_confidence: reassign_base,
        steps: vec![
            target_step,
            "Confirm the new owner has the context to take it over".to_string(),
        ],
        impact_summary: "Removes one task from the overloaded schedule".to_string(),
        impact_days: Some(0.0),
    });

    let shift = f64::from(max_complexity(&tasks)).max(1.0);
    out.push(Candidate {
        resolution_type: ResolutionType::Reschedule,
        base_confidence: if conflict.severity >= Severity::High { 65 } else { 55 },
        steps: vec![
            format!("Move '{first}' to start after the overlapping work finishes"),
            "Update downstream dates if anything depends on it".to_string(),
        ],
        impact_summary: format!("Serializes the overlap, delaying one task ~{shift:.0} days"),
        impact_days: Some(shift),
    });

    if max_complexity(&tasks) >= 5 {
        out.push(Candidate {
            resolution_type: ResolutionType::SplitTask,
            base_confidence: 45,
            steps: vec![
                format!("Split '{first}' into independently schedulable parts"),
                "Assign the parts across the overlap window".to_string(),
            ],
            impact_summary: "Reduces the size of any single scheduling block".to_string(),
            impact_days: Some(1.0),
        });
    }

    out.push(Candidate {
        resolution_type: ResolutionType::AddResources,
        base_confidence: if conflict.severity == Severity::Critical { 45 } else { 35 },
        steps: vec![
            "Bring another contributor onto the overlapping work".to_string(),
            "Rebalance the task list once they ramp up".to_string(),
        ],
        impact_summary: "Adds capacity instead of moving dates".to_string(),
        impact_days: Some(0.0),
    });

    out
}

fn schedule_candidates(conflict: &Conflict, snapshot: &Snapshot) -> Vec<Candidate> {
    let tasks = affected_tasks(conflict, snapshot);
    let first = tasks.first().map(|t| t.title.clone()).unwrap_or_default();
    let slip = f64::from(max_complexity(&tasks)).max(2.0);
    let mut out = Vec::new();

    out.push(Candidate {
        resolution_type: ResolutionType::Reschedule,
        base_confidence: if conflict.severity >= Severity::High { 65 } else { 60 },
        steps: vec![
            format!("Push the due date of '{first}' out by ~{slip:.0} days"),
            "Communicate the new date to stakeholders".to_string(),
        ],
        impact_summary: format!("Delays delivery by ~{slip:.0} days"),
        impact_days: Some(slip),
    });

    out.push(Candidate {
        resolution_type: ResolutionType::AdjustDates,
        base_confidence: if conflict.affected_tasks.len() >= 3 { 55 } else { 45 },
        steps: vec![
            "Stagger the deadlines in this group so they no longer land together".to_string(),
            "Keep the most business-critical date fixed and move the rest".to_string(),
        ],
        impact_summary: "Spreads the crunch across a wider window".to_string(),
        impact_days: Some((conflict.affected_tasks.len() as f64).max(1.0)),
    });

    if max_complexity(&tasks) >= 5 {
        out.push(Candidate {
            resolution_type: ResolutionType::ReduceScope,
            base_confidence: 45,
            steps: vec![
                format!("Trim '{first}' to a deliverable that fits the remaining window"),
                "Capture the cut scope as follow-up work".to_string(),
            ],
            impact_summary: "Keeps the date at the cost of scope".to_string(),
            impact_days: Some(0.0),
        });
    }

    out.push(Candidate {
        resolution_type: ResolutionType::AddResources,
        base_confidence: if conflict.severity >= Severity::High { 45 } else { 35 },
        steps: vec![
            "Add a contributor to the at-risk work".to_string(),
            "Pair them with the current owner to split the remaining effort".to_string(),
        ],
        impact_summary: "Compresses the remaining effort without moving dates".to_string(),
        impact_days: Some(0.0),
    });

    out
}

fn dependency_candidates(conflict: &Conflict, snapshot: &Snapshot) -> Vec<Candidate> {
    let tasks = affected_tasks(conflict, snapshot);
    let first = tasks.first().map(|t| t.title.clone()).unwrap_or_default();
    let is_cycle = conflict.severity == Severity::Critical;
    let mut out = Vec::new();

    out.push(Candidate {
        resolution_type: ResolutionType::ModifyDependency,
        base_confidence: if is_cycle { 70 } else { 60 },
        steps: if is_cycle {
            vec![
                format!("Pick the weakest link in the cycle involving '{first}' and remove it"),
                "Re-verify the remaining chain is acyclic".to_string(),
            ]
        } else {
            vec![
                format!("Relax the blocking dependency on '{first}' so work can start earlier"),
                "Confirm the partial overlap is safe with both owners".to_string(),
            ]
        },
        impact_summary: "Changes the dependency graph rather than any dates".to_string(),
        impact_days: Some(0.0),
    });

    let slip = f64::from(max_complexity(&tasks)).max(2.0);
    out.push(Candidate {
        resolution_type: ResolutionType::Reschedule,
        base_confidence: 50,
        steps: vec![
            format!("Move the due date of '{first}' past its predecessor's projected finish"),
            "Propagate the shift to anything downstream".to_string(),
        ],
        impact_summary: format!("Accepts ~{slip:.0} days of slip to honor the dependency"),
        impact_days: Some(slip),
    });

    out.push(Candidate {
        resolution_type: ResolutionType::SplitTask,
        base_confidence: if max_complexity(&tasks) >= 5 { 45 } else { 40 },
        steps: vec![
            format!("Split '{first}' so the non-blocked portion can proceed now"),
            "Keep only the truly dependent part behind the predecessor".to_string(),
        ],
        impact_summary: "Unblocks partial progress while the predecessor finishes".to_string(),
        impact_days: Some(1.0),
    });

    out
}
