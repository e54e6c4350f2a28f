//! Point-ledger updates: the student total and its append-only transaction log.

use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{error, warn};
use uuid::Uuid;

use crate::db;
use crate::model::{now_timestamp, PointAction, PointTransaction, Rule, RuleKind, Student};

pub const GROUP_REASON_SUFFIX: &str = " (Grup)";

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("points must be at least 1, got {0}")]
    InvalidMagnitude(i64),
    #[error("reason must not be empty")]
    EmptyReason,
    #[error("either ruleId or points is required")]
    MissingEntry,
    #[error("rule not found: {0}")]
    RuleNotFound(String),
    #[error("{kind} rules cannot be used to {action} points")]
    RuleActionMismatch {
        kind: &'static str,
        action: &'static str,
    },
    #[error("student not found: {0}")]
    StudentNotFound(String),
    #[error("no students selected")]
    EmptySelection,
    #[error(transparent)]
    Store(#[from] rusqlite::Error),
}

impl LedgerError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidMagnitude(_)
            | Self::EmptyReason
            | Self::MissingEntry
            | Self::EmptySelection => "bad_params",
            Self::RuleNotFound(_) | Self::StudentNotFound(_) => "not_found",
            Self::RuleActionMismatch { .. } => "rule_action_mismatch",
            Self::Store(_) => "db_update_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerOptions {
    pub floor_at_zero: bool,
}

/// A validated point entry: a magnitude of at least 1 and a non-empty reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PointEntry {
    pub magnitude: i64,
    pub reason: String,
}

impl PointEntry {
    pub fn delta(&self, action: PointAction) -> i64 {
        action.signed(self.magnitude)
    }
}

pub fn manual_entry(points: i64, reason: &str) -> Result<PointEntry, LedgerError> {
    if points < 1 {
        return Err(LedgerError::InvalidMagnitude(points));
    }
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(LedgerError::EmptyReason);
    }
    Ok(PointEntry {
        magnitude: points,
        reason: reason.to_string(),
    })
}

/// Prefills magnitude and reason from `rule`. The caller's reason wins when it is not blank.
pub fn rule_entry(
    rule: &Rule,
    action: PointAction,
    reason_override: Option<&str>,
) -> Result<PointEntry, LedgerError> {
    if rule.kind.action() != action {
        return Err(LedgerError::RuleActionMismatch {
            kind: rule.kind.as_str(),
            action: action.as_str(),
        });
    }
    let reason = reason_override
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .unwrap_or(rule.description.as_str());
    // Rows written before signs were normalised may still hold i64::MIN.
    let magnitude = rule
        .points
        .checked_abs()
        .ok_or(LedgerError::InvalidMagnitude(rule.points))?;
    manual_entry(magnitude, reason)
}

pub fn resolve_entry(
    conn: &Connection,
    user_id: &str,
    action: PointAction,
    rule_id: Option<&str>,
    points: Option<i64>,
    reason: Option<&str>,
) -> Result<PointEntry, LedgerError> {
    match (rule_id, points) {
        (Some(rule_id), _) => {
            let rule = db::get_rule(conn, user_id, rule_id)?
                .ok_or_else(|| LedgerError::RuleNotFound(rule_id.to_string()))?;
            rule_entry(&rule, action, reason)
        }
        (None, Some(points)) => manual_entry(points, reason.unwrap_or("")),
        (None, None) => Err(LedgerError::MissingEntry),
    }
}

/// Rules offered under `action`: achievements when adding, violations when subtracting.
pub fn candidates(rules: &[Rule], action: PointAction) -> Vec<&Rule> {
    let kind = match action {
        PointAction::Add => RuleKind::Achievement,
        PointAction::Subtract => RuleKind::Violation,
    };
    rules.iter().filter(|r| r.kind == kind).collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct PointChange {
    pub student: Student,
    pub transaction: PointTransaction,
}

/// Applies `delta` to one student. The total update and the ledger row commit together.
pub fn apply_points(
    conn: &Connection,
    user_id: &str,
    student_id: &str,
    delta: i64,
    reason: &str,
    opts: LedgerOptions,
) -> Result<PointChange, LedgerError> {
    let tx = conn.unchecked_transaction()?;

    let current = db::get_student(&tx, user_id, student_id)?
        .ok_or_else(|| LedgerError::StudentNotFound(student_id.to_string()))?;

    let mut new_total = current.points.saturating_add(delta);
    if opts.floor_at_zero && new_total < 0 {
        new_total = 0;
    }
    let applied = new_total.saturating_sub(current.points);

    tx.execute(
        "UPDATE students SET points = ? WHERE id = ? AND user_id = ?",
        (new_total, student_id, user_id),
    )?;

    let transaction = PointTransaction {
        id: Uuid::new_v4().to_string(),
        student_id: student_id.to_string(),
        points: applied,
        reason: reason.to_string(),
        user_id: user_id.to_string(),
        created_at: now_timestamp(),
    };
    tx.execute(
        "INSERT INTO point_transactions(id, student_id, points, reason, user_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &transaction.id,
            &transaction.student_id,
            transaction.points,
            &transaction.reason,
            &transaction.user_id,
            &transaction.created_at,
        ),
    )?;

    tx.commit()?;

    Ok(PointChange {
        student: Student {
            points: new_total,
            ..current
        },
        transaction,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupFailure {
    #[serde(rename = "studentId")]
    pub student_id: String,
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupOutcome {
    pub applied: Vec<String>,
    pub failed: Vec<GroupFailure>,
    /// Fresh roster read after the batch; `None` when that read failed.
    pub students: Option<Vec<Student>>,
}

/// Applies the same delta to every selected student, one independent unit each,
/// then re-reads the whole roster.
pub fn apply_group(
    conn: &Connection,
    user_id: &str,
    student_ids: &[String],
    delta: i64,
    reason: &str,
    opts: LedgerOptions,
) -> Result<GroupOutcome, LedgerError> {
    if student_ids.is_empty() {
        return Err(LedgerError::EmptySelection);
    }

    let group_reason = format!("{reason}{GROUP_REASON_SUFFIX}");
    let mut seen = HashSet::new();
    let mut applied = Vec::new();
    let mut failed = Vec::new();

    for id in student_ids {
        if !seen.insert(id.as_str()) {
            continue;
        }
        match apply_points(conn, user_id, id, delta, &group_reason, opts) {
            Ok(_) => applied.push(id.clone()),
            Err(e) => {
                warn!(student_id = %id, error = %e, "group point update failed for student");
                failed.push(GroupFailure {
                    student_id: id.clone(),
                    code: e.code(),
                    message: e.to_string(),
                });
            }
        }
    }

    let students = match db::list_students(conn, user_id) {
        Ok(v) => Some(v),
        Err(e) => {
            error!(error = %e, "roster resync after group update failed");
            None
        }
    };

    Ok(GroupOutcome {
        applied,
        failed,
        students,
    })
}
