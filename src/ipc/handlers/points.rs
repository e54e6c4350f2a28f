use serde_json::json;
use tracing::{info, warn};

use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{action_param, optional_i64, optional_str, required_str, signed_in, Ctx};
use crate::ipc::types::{AppState, Request};
use crate::ledger::{self, LedgerOptions, PointEntry};
use crate::model::PointAction;

/// Either a rule selection or a manual magnitude; the action always supplies the sign.
fn entry_from_params(ctx: &Ctx<'_>, req: &Request, action: PointAction) -> Result<PointEntry, HandlerErr> {
    let entry = ledger::resolve_entry(
        ctx.conn,
        &ctx.session.user_id,
        action,
        optional_str(&req.params, "ruleId"),
        optional_i64(&req.params, "points")?,
        optional_str(&req.params, "reason"),
    )?;
    Ok(entry)
}

fn options(ctx: &Ctx<'_>) -> LedgerOptions {
    LedgerOptions {
        floor_at_zero: ctx.config.floor_at_zero,
    }
}

fn handle_points_apply(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = signed_in(state)?;
    let student_id = required_str(&req.params, "studentId")?;
    let action = action_param(&req.params)?;
    let entry = entry_from_params(&ctx, req, action)?;

    let change = ledger::apply_points(
        ctx.conn,
        &ctx.session.user_id,
        &student_id,
        entry.delta(action),
        &entry.reason,
        options(&ctx),
    )?;

    ctx.session.replace_student(change.student.clone());
    Ok(json!({
        "student": change.student,
        "transaction": change.transaction,
    }))
}

fn handle_points_apply_group(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = signed_in(state)?;
    let Some(ids) = req.params.get("studentIds").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing studentIds[]"));
    };
    let student_ids = ids
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect::<Option<Vec<String>>>()
        .ok_or_else(|| HandlerErr::bad_params("studentIds must be strings"))?;
    if student_ids.is_empty() {
        return Err(HandlerErr::bad_params("no students selected"));
    }
    let action = action_param(&req.params)?;
    let entry = entry_from_params(&ctx, req, action)?;

    let outcome = ledger::apply_group(
        ctx.conn,
        &ctx.session.user_id,
        &student_ids,
        entry.delta(action),
        &entry.reason,
        options(&ctx),
    )?;

    let resynced = outcome.students.is_some();
    if let Some(students) = outcome.students.clone() {
        ctx.session.roster = students;
    }
    if outcome.failed.is_empty() {
        info!(applied = outcome.applied.len(), "group point update done");
    } else {
        warn!(
            applied = outcome.applied.len(),
            failed = outcome.failed.len(),
            "group point update finished with failures"
        );
    }

    Ok(json!({
        "applied": outcome.applied,
        "failed": outcome.failed,
        "resynced": resynced,
        "students": ctx.session.roster,
    }))
}

fn handle_points_history(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = signed_in(state)?;
    let student_id = required_str(&req.params, "studentId")?;

    let exists = db::get_student(ctx.conn, &ctx.session.user_id, &student_id)
        .map_err(|e| HandlerErr::store("db_query_failed", e))?
        .is_some();
    if !exists {
        return Err(HandlerErr::new("not_found", "student not found"));
    }

    let transactions = db::student_history(ctx.conn, &ctx.session.user_id, &student_id)
        .map_err(|e| HandlerErr::store("db_query_failed", e))?;
    Ok(json!({ "studentId": student_id, "transactions": transactions }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "points.apply" => handle_points_apply(state, req),
        "points.applyGroup" => handle_points_apply_group(state, req),
        "points.history" => handle_points_history(state, req),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
