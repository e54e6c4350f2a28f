use serde_json::json;
use std::path::Path;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{optional_str, required_str, signed_in, sort_param, Ctx};
use crate::ipc::types::{AppState, Request};
use crate::model::{now_timestamp, Student};
use crate::roster;
use crate::storage::STUDENT_PHOTOS;

fn roster_view(ctx: &Ctx<'_>, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let sort = sort_param(&req.params)?;
    let search = optional_str(&req.params, "search").unwrap_or("");
    let entries = roster::view(&ctx.session.roster, search, sort);
    Ok(json!({
        "students": entries,
        "total": ctx.session.roster.len(),
        "sortBy": sort.as_str(),
    }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = signed_in(state)?;
    ctx.session.roster = db::list_students(ctx.conn, &ctx.session.user_id)
        .map_err(|e| HandlerErr::store("db_query_failed", e))?;
    roster_view(&ctx, req)
}

fn handle_roster_view(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = signed_in(state)?;
    roster_view(&ctx, req)
}

fn upload_photo(ctx: &Ctx<'_>, path: &str) -> Result<String, HandlerErr> {
    let obj = ctx
        .objects()?
        .upload(STUDENT_PHOTOS, &ctx.session.user_id, Path::new(path), "")
        .map_err(|e| HandlerErr::store("storage_failed", format!("{e:#}")))?;
    Ok(obj.public_url)
}

fn remove_photo(ctx: &Ctx<'_>, url: &str) {
    let Ok(objects) = ctx.objects() else {
        return;
    };
    let Some(key) = objects.key_from_url(STUDENT_PHOTOS, url) else {
        warn!(url, "photo url is not managed by this workspace; leaving it");
        return;
    };
    if let Err(e) = objects.remove(STUDENT_PHOTOS, &key) {
        warn!(error = ?e, key = %key, "failed to remove student photo");
    }
}

fn handle_students_create(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = signed_in(state)?;
    ctx.require_admin()?;

    let name = required_str(&req.params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let photo_url = match optional_str(&req.params, "photoPath") {
        Some(p) => Some(upload_photo(&ctx, p)?),
        None => None,
    };

    let student = Student {
        id: Uuid::new_v4().to_string(),
        name,
        photo_url,
        points: 0,
        user_id: ctx.session.user_id.clone(),
        created_at: now_timestamp(),
    };
    ctx.conn
        .execute(
            "INSERT INTO students(id, name, photo_url, points, user_id, created_at)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                &student.id,
                &student.name,
                &student.photo_url,
                student.points,
                &student.user_id,
                &student.created_at,
            ),
        )
        .map_err(|e| {
            HandlerErr::store("db_insert_failed", e).with_details(json!({ "table": "students" }))
        })?;

    info!(student_id = %student.id, "student created");
    ctx.session.roster.insert(0, student.clone());
    Ok(json!({ "student": student }))
}

fn handle_students_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = signed_in(state)?;
    ctx.require_admin()?;

    let student_id = required_str(&req.params, "studentId")?;
    let mut student = db::get_student(ctx.conn, &ctx.session.user_id, &student_id)
        .map_err(|e| HandlerErr::store("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "student not found"))?;

    if let Some(name) = optional_str(&req.params, "name") {
        let name = name.trim();
        if name.is_empty() {
            return Err(HandlerErr::bad_params("name must not be empty"));
        }
        student.name = name.to_string();
    }
    if let Some(p) = optional_str(&req.params, "photoPath") {
        student.photo_url = Some(upload_photo(&ctx, p)?);
    }

    ctx.conn
        .execute(
            "UPDATE students SET name = ?, photo_url = ? WHERE id = ? AND user_id = ?",
            (
                &student.name,
                &student.photo_url,
                &student.id,
                &student.user_id,
            ),
        )
        .map_err(|e| HandlerErr::store("db_update_failed", e))?;

    ctx.session.replace_student(student.clone());
    Ok(json!({ "student": student }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = signed_in(state)?;
    ctx.require_admin()?;

    let student_id = required_str(&req.params, "studentId")?;
    let student = db::get_student(ctx.conn, &ctx.session.user_id, &student_id)
        .map_err(|e| HandlerErr::store("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::new("not_found", "student not found"))?;

    if let Some(url) = student.photo_url.as_deref() {
        remove_photo(&ctx, url);
    }

    // Ledger rows go with the student through the cascading foreign key.
    ctx.conn
        .execute(
            "DELETE FROM students WHERE id = ? AND user_id = ?",
            (&student.id, &student.user_id),
        )
        .map_err(|e| {
            HandlerErr::store("db_delete_failed", e).with_details(json!({ "table": "students" }))
        })?;

    info!(student_id = %student.id, "student deleted");
    ctx.session.roster.retain(|s| s.id != student.id);
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "students.list" => handle_students_list(state, req),
        "roster.view" => handle_roster_view(state, req),
        "students.create" => handle_students_create(state, req),
        "students.update" => handle_students_update(state, req),
        "students.delete" => handle_students_delete(state, req),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
