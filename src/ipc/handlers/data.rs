use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::backup;
use crate::db;
use crate::exchange::{self, Entity, ExportDocument};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{optional_str, required_str, signed_in, Ctx};
use crate::ipc::types::{AppState, Request};

fn entity_param(params: &serde_json::Value) -> Result<Option<Entity>, HandlerErr> {
    match optional_str(params, "entity") {
        None => Ok(None),
        Some(raw) => Entity::parse(raw)
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params("entity must be one of: students, rules")),
    }
}

fn export_document(ctx: &Ctx<'_>) -> Result<ExportDocument, HandlerErr> {
    let transactions = db::list_transactions(ctx.conn, &ctx.session.user_id)
        .map_err(|e| HandlerErr::store("db_query_failed", e))?;
    Ok(ExportDocument::new(
        ctx.session.roster.clone(),
        ctx.session.rules.clone(),
        transactions,
    ))
}

fn handle_data_export(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = signed_in(state)?;
    let entity = entity_param(&req.params)?;
    let doc = export_document(&ctx)?;
    let exported_at = doc.exported_at.clone();

    let value = match entity {
        Some(Entity::Students) => json!(doc.students),
        Some(Entity::Rules) => json!(doc.rules),
        None => json!(doc),
    };

    let Some(out) = optional_str(&req.params, "outPath") else {
        return Ok(json!({ "data": value }));
    };
    let written = exchange::write_export(&value, &PathBuf::from(out), &exported_at)
        .map_err(|e| HandlerErr::store("io_failed", format!("{e:#}")))?;
    info!(path = %written.to_string_lossy(), "export written");
    Ok(json!({
        "path": written.to_string_lossy(),
        "fileName": written.file_name().map(|n| n.to_string_lossy().to_string()),
        "exportedAt": exported_at,
    }))
}

fn handle_data_export_bundle(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = signed_in(state)?;
    let out = PathBuf::from(required_str(&req.params, "outPath")?);
    let doc = export_document(&ctx)?;

    let summary = backup::export_backup_bundle(&json!(doc), &out)
        .map_err(|e| HandlerErr::store("io_failed", format!("{e:#}")))?;
    info!(path = %out.to_string_lossy(), sha256 = %summary.sha256, "backup bundle written");
    Ok(json!({
        "path": out.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "entryCount": summary.entry_count,
        "sha256": summary.sha256,
    }))
}

fn handle_data_import(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = signed_in(state)?;
    let entity = entity_param(&req.params)?;

    let source = match (optional_str(&req.params, "path"), req.params.get("data")) {
        (Some(p), _) => exchange::read_import_file(&PathBuf::from(p))?,
        (None, Some(data)) => data.clone(),
        (None, None) => return Err(HandlerErr::bad_params("missing path or data")),
    };
    let plan = exchange::plan_import(&source, entity)?;
    let summary = exchange::apply_import(ctx.conn, &ctx.session.user_id, &plan);

    let failed = summary.students.failed.len() + summary.rules.failed.len();
    if failed > 0 {
        warn!(failed, "import finished with record failures");
    }
    info!(
        students_inserted = summary.students.inserted,
        students_updated = summary.students.updated,
        rules_inserted = summary.rules.inserted,
        rules_updated = summary.rules.updated,
        transactions_skipped = summary.transactions_skipped,
        "import applied"
    );

    // The cached roster and rule list are replaced wholesale after an import.
    ctx.session.roster = db::list_students(ctx.conn, &ctx.session.user_id)
        .map_err(|e| HandlerErr::store("db_query_failed", e))?;
    ctx.session.rules = db::list_rules(ctx.conn, &ctx.session.user_id)
        .map_err(|e| HandlerErr::store("db_query_failed", e))?;

    Ok(json!({
        "summary": summary,
        "studentCount": ctx.session.roster.len(),
        "ruleCount": ctx.session.rules.len(),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "data.export" => handle_data_export(state, req),
        "data.exportBundle" => handle_data_export_bundle(state, req),
        "data.import" => handle_data_import(state, req),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
