use rusqlite::Connection;

use crate::config::Config;
use crate::ipc::error::HandlerErr;
use crate::ipc::types::{AppState, Session};
use crate::model::{PointAction, Role};
use crate::roster::SortKey;
use crate::storage::ObjectStore;

pub fn required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn optional_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

pub fn optional_i64(params: &serde_json::Value, key: &str) -> Result<Option<i64>, HandlerErr> {
    match params.get(key) {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an integer", key))),
    }
}

pub fn action_param(params: &serde_json::Value) -> Result<PointAction, HandlerErr> {
    let raw = required_str(params, "action")?;
    PointAction::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params("action must be one of: add, subtract"))
}

pub fn sort_param(params: &serde_json::Value) -> Result<SortKey, HandlerErr> {
    match optional_str(params, "sortBy") {
        None => Ok(SortKey::default()),
        Some(raw) => SortKey::parse(raw).ok_or_else(|| {
            HandlerErr::bad_params("sortBy must be one of: points-desc, points-asc, name-asc, name-desc")
        }),
    }
}

/// Everything a data handler needs once a workspace is open and a user is signed in.
pub struct Ctx<'a> {
    pub conn: &'a Connection,
    pub session: &'a mut Session,
    pub config: &'a Config,
    pub objects: Option<&'a ObjectStore>,
}

pub fn signed_in(state: &mut AppState) -> Result<Ctx<'_>, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Err(HandlerErr::new("no_workspace", "select a workspace first"));
    };
    let Some(session) = state.session.as_mut() else {
        return Err(HandlerErr::new("not_authenticated", "sign in first"));
    };
    Ok(Ctx {
        conn,
        session,
        config: &state.config,
        objects: state.objects.as_ref(),
    })
}

impl Ctx<'_> {
    pub fn require_admin(&self) -> Result<(), HandlerErr> {
        if self.session.profile.role == Role::Admin {
            Ok(())
        } else {
            Err(HandlerErr::new("forbidden", "admin role required"))
        }
    }

    pub fn objects(&self) -> Result<&ObjectStore, HandlerErr> {
        self.objects
            .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
    }
}
