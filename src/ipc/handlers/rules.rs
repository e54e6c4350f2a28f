use serde_json::json;
use uuid::Uuid;

use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{action_param, optional_i64, required_str, signed_in};
use crate::ipc::types::{AppState, Request};
use crate::ledger;
use crate::model::{now_timestamp, Rule, RuleKind};

struct RuleFields {
    description: String,
    points: i64,
    kind: RuleKind,
}

/// The editor stores the magnitude with the sign its category implies.
fn rule_fields(params: &serde_json::Value) -> Result<RuleFields, HandlerErr> {
    let description = required_str(params, "description")?.trim().to_string();
    if description.is_empty() {
        return Err(HandlerErr::bad_params("description must not be empty"));
    }
    let kind_raw = required_str(params, "type")?;
    let kind = RuleKind::parse(&kind_raw)
        .ok_or_else(|| HandlerErr::bad_params("type must be one of: achievement, violation"))?;
    let magnitude = optional_i64(params, "points")?
        .ok_or_else(|| HandlerErr::bad_params("missing points"))?;
    if magnitude == 0 {
        return Err(HandlerErr::bad_params("points must not be zero"));
    }
    let points = kind
        .signed(magnitude)
        .ok_or_else(|| HandlerErr::bad_params(format!("points out of range: {}", magnitude)))?;
    Ok(RuleFields {
        description,
        points,
        kind,
    })
}

fn handle_rules_list(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let ctx = signed_in(state)?;
    Ok(json!({ "rules": ctx.session.rules }))
}

fn handle_rules_candidates(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = signed_in(state)?;
    let action = action_param(&req.params)?;
    let rules = ledger::candidates(&ctx.session.rules, action);
    Ok(json!({ "action": action.as_str(), "rules": rules }))
}

fn handle_rules_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = signed_in(state)?;
    let fields = rule_fields(&req.params)?;

    let rule = Rule {
        id: Uuid::new_v4().to_string(),
        description: fields.description,
        points: fields.points,
        kind: fields.kind,
        user_id: ctx.session.user_id.clone(),
        created_at: now_timestamp(),
    };
    ctx.conn
        .execute(
            "INSERT INTO rules(id, description, points, type, user_id, created_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &rule.id,
                &rule.description,
                rule.points,
                rule.kind.as_str(),
                &rule.user_id,
                &rule.created_at,
            ),
        )
        .map_err(|e| {
            HandlerErr::store("db_insert_failed", e).with_details(json!({ "table": "rules" }))
        })?;

    ctx.session.rules.push(rule.clone());
    Ok(json!({ "rule": rule }))
}

fn handle_rules_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = signed_in(state)?;
    let rule_id = required_str(&req.params, "ruleId")?;
    let fields = rule_fields(&req.params)?;

    let mut rule = db::get_rule(ctx.conn, &ctx.session.user_id, &rule_id)
        .map_err(|e| HandlerErr::store("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "rule not found"))?;
    rule.description = fields.description;
    rule.points = fields.points;
    rule.kind = fields.kind;

    ctx.conn
        .execute(
            "UPDATE rules SET description = ?, points = ?, type = ? WHERE id = ? AND user_id = ?",
            (
                &rule.description,
                rule.points,
                rule.kind.as_str(),
                &rule.id,
                &rule.user_id,
            ),
        )
        .map_err(|e| HandlerErr::store("db_update_failed", e))?;

    ctx.session.replace_rule(rule.clone());
    Ok(json!({ "rule": rule }))
}

fn handle_rules_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = signed_in(state)?;
    let rule_id = required_str(&req.params, "ruleId")?;

    let changed = ctx
        .conn
        .execute(
            "DELETE FROM rules WHERE id = ? AND user_id = ?",
            (&rule_id, &ctx.session.user_id),
        )
        .map_err(|e| {
            HandlerErr::store("db_delete_failed", e).with_details(json!({ "table": "rules" }))
        })?;
    if changed == 0 {
        return Err(HandlerErr::new("not_found", "rule not found"));
    }

    ctx.session.rules.retain(|r| r.id != rule_id);
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "rules.list" => handle_rules_list(state),
        "rules.candidates" => handle_rules_candidates(state, req),
        "rules.create" => handle_rules_create(state, req),
        "rules.update" => handle_rules_update(state, req),
        "rules.delete" => handle_rules_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
