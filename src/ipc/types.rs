use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::config::Config;
use crate::model::{Profile, Rule, Student};
use crate::storage::ObjectStore;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub config: Config,
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    pub objects: Option<ObjectStore>,
    pub session: Option<Session>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            workspace: None,
            db: None,
            objects: None,
            session: None,
        }
    }
}

/// The signed-in user and the cached copies the UI works from.
pub struct Session {
    pub user_id: String,
    pub profile: Profile,
    /// Set when the profile row could not be read or created and a local default is in use.
    pub profile_degraded: bool,
    pub roster: Vec<Student>,
    pub rules: Vec<Rule>,
}

impl Session {
    pub fn replace_student(&mut self, student: Student) {
        match self.roster.iter_mut().find(|s| s.id == student.id) {
            Some(slot) => *slot = student,
            None => self.roster.insert(0, student),
        }
    }

    pub fn replace_rule(&mut self, rule: Rule) {
        match self.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(slot) => *slot = rule,
            None => self.rules.push(rule),
        }
    }
}
