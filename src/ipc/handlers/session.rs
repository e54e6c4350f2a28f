use rusqlite::Connection;
use serde_json::json;
use std::path::Path;
use tracing::{info, warn};

use crate::config::Config;
use crate::db;
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{optional_str, required_str, signed_in};
use crate::ipc::types::{AppState, Request, Session};
use crate::model::Profile;
use crate::storage::APP_ASSETS;

fn default_profile(config: &Config, user_id: &str) -> Profile {
    Profile {
        id: user_id.to_string(),
        app_name: config.default_app_name.clone(),
        logo_url: None,
        favicon_url: None,
        role: config.default_role,
    }
}

/// Reads the profile, creating it on first sign-in. Any failure degrades to a local default.
fn load_profile(conn: &Connection, config: &Config, user_id: &str) -> (Profile, bool) {
    match db::get_profile(conn, user_id) {
        Ok(Some(p)) => (p, false),
        Ok(None) => {
            let fresh = default_profile(config, user_id);
            match db::insert_profile(conn, &fresh) {
                Ok(()) => {
                    info!(user_id, "created profile");
                    (fresh, false)
                }
                Err(e) => {
                    warn!(user_id, error = %e, "failed to create profile; using local default");
                    (fresh, true)
                }
            }
        }
        Err(e) => {
            warn!(user_id, error = %e, "could not read profile; using local default");
            (default_profile(config, user_id), true)
        }
    }
}

fn load_session(conn: &Connection, config: &Config, user_id: &str) -> Result<Session, HandlerErr> {
    match db::claim_unowned_students(conn, user_id) {
        Ok(0) => {}
        Ok(n) => info!(user_id, adopted = n, "adopted students without an owner"),
        Err(e) => warn!(user_id, error = %e, "could not adopt unowned students"),
    }

    let roster = db::list_students(conn, user_id)
        .map_err(|e| HandlerErr::store("load_failed", format!("failed to load students: {e}")))?;
    let rules = db::list_rules(conn, user_id)
        .map_err(|e| HandlerErr::store("load_failed", format!("failed to load rules: {e}")))?;
    let (profile, profile_degraded) = load_profile(conn, config, user_id);

    Ok(Session {
        user_id: user_id.to_string(),
        profile,
        profile_degraded,
        roster,
        rules,
    })
}

fn profile_json(session: &Session) -> serde_json::Value {
    let mut v = json!(session.profile);
    v["degraded"] = json!(session.profile_degraded);
    v
}

fn sign_in(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let user_id = required_str(&req.params, "userId")?.trim().to_string();
    if user_id.is_empty() {
        return Err(HandlerErr::bad_params("userId must not be empty"));
    }
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };

    state.session = None;
    let session = load_session(conn, &state.config, &user_id)?;
    info!(
        user_id = %user_id,
        students = session.roster.len(),
        rules = session.rules.len(),
        "signed in"
    );
    let result = json!({
        "userId": session.user_id,
        "profile": profile_json(&session),
        "studentCount": session.roster.len(),
        "ruleCount": session.rules.len(),
    });
    state.session = Some(session);
    Ok(result)
}

fn sign_out(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    if let Some(s) = state.session.take() {
        info!(user_id = %s.user_id, "signed out");
    }
    Ok(json!({ "ok": true }))
}

fn session_get(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    Ok(match state.session.as_ref() {
        Some(s) => json!({ "userId": s.user_id, "profile": profile_json(s) }),
        None => json!({ "userId": null, "profile": null }),
    })
}

fn profile_get(state: &mut AppState) -> Result<serde_json::Value, HandlerErr> {
    let ctx = signed_in(state)?;
    Ok(json!({ "profile": profile_json(ctx.session) }))
}

fn profile_update(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let ctx = signed_in(state)?;
    let user_id = ctx.session.user_id.clone();

    let mut next = ctx.session.profile.clone();
    if let Some(name) = optional_str(&req.params, "appName") {
        let name = name.trim();
        next.app_name = if name.is_empty() {
            ctx.config.default_app_name.clone()
        } else {
            name.to_string()
        };
    }

    for (param, prefix) in [("logoPath", "logo-"), ("faviconPath", "favicon-")] {
        let Some(path) = optional_str(&req.params, param) else {
            continue;
        };
        let obj = ctx
            .objects()?
            .upload(APP_ASSETS, &user_id, Path::new(path), prefix)
            .map_err(|e| {
                HandlerErr::store("storage_failed", format!("{e:#}"))
                    .with_details(json!({ "param": param }))
            })?;
        if param == "logoPath" {
            next.logo_url = Some(obj.public_url);
        } else {
            next.favicon_url = Some(obj.public_url);
        }
    }

    let changed = ctx
        .conn
        .execute(
            "UPDATE profiles SET app_name = ?, logo_url = ?, favicon_url = ? WHERE id = ?",
            (&next.app_name, &next.logo_url, &next.favicon_url, &user_id),
        )
        .map_err(|e| HandlerErr::store("db_update_failed", e))?;
    if changed == 0 {
        // Degraded sessions have no row yet.
        db::insert_profile(ctx.conn, &next).map_err(|e| HandlerErr::store("db_insert_failed", e))?;
    }

    ctx.session.profile = next;
    ctx.session.profile_degraded = false;
    Ok(json!({ "profile": profile_json(ctx.session) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let res = match req.method.as_str() {
        "session.signIn" => sign_in(state, req),
        "session.signOut" => sign_out(state),
        "session.get" => session_get(state),
        "profile.get" => profile_get(state),
        "profile.update" => profile_update(state, req),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
