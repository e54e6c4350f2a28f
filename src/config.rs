use anyhow::{anyhow, Result};
use std::env;
use std::path::PathBuf;

use crate::model::Role;

pub const DEFAULT_APP_NAME: &str = "Sistem Poin Siswa";

#[derive(Debug, Clone)]
pub struct Config {
    pub workspace: Option<PathBuf>,
    pub default_app_name: String,
    pub default_role: Role,
    pub floor_at_zero: bool,
    pub storage_public_url: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workspace: None,
            default_app_name: DEFAULT_APP_NAME.to_string(),
            default_role: Role::Teacher,
            floor_at_zero: false,
            storage_public_url: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut cfg = Config::default();

        if let Some(path) = non_empty(lookup("EPOIN_WORKSPACE")) {
            cfg.workspace = Some(PathBuf::from(path));
        }
        if let Some(name) = non_empty(lookup("EPOIN_DEFAULT_APP_NAME")) {
            cfg.default_app_name = name;
        }
        if let Some(role) = non_empty(lookup("EPOIN_DEFAULT_ROLE")) {
            cfg.default_role = Role::parse(&role)
                .ok_or_else(|| anyhow!("EPOIN_DEFAULT_ROLE must be admin or teacher, got {role}"))?;
        }
        if let Some(flag) = non_empty(lookup("EPOIN_FLOOR_AT_ZERO")) {
            cfg.floor_at_zero = parse_flag(&flag)
                .ok_or_else(|| anyhow!("EPOIN_FLOOR_AT_ZERO must be a boolean, got {flag}"))?;
        }
        cfg.storage_public_url =
            non_empty(lookup("EPOIN_STORAGE_PUBLIC_URL")).map(|s| s.trim_end_matches('/').to_string());

        Ok(cfg)
    }
}

fn non_empty(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_uses_defaults() {
        let cfg = Config::from_lookup(lookup_from(&[])).expect("config");
        assert_eq!(cfg.default_app_name, DEFAULT_APP_NAME);
        assert_eq!(cfg.default_role, Role::Teacher);
        assert!(!cfg.floor_at_zero);
        assert!(cfg.workspace.is_none());
        assert!(cfg.storage_public_url.is_none());
    }

    #[test]
    fn reads_overrides_and_trims_public_url() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("EPOIN_DEFAULT_ROLE", "Admin"),
            ("EPOIN_FLOOR_AT_ZERO", "yes"),
            ("EPOIN_STORAGE_PUBLIC_URL", "https://cdn.example.test/objects/"),
            ("EPOIN_DEFAULT_APP_NAME", "  "),
        ]))
        .expect("config");
        assert_eq!(cfg.default_role, Role::Admin);
        assert!(cfg.floor_at_zero);
        assert_eq!(
            cfg.storage_public_url.as_deref(),
            Some("https://cdn.example.test/objects")
        );
        assert_eq!(cfg.default_app_name, DEFAULT_APP_NAME);
    }

    #[test]
    fn rejects_unknown_role() {
        let res = Config::from_lookup(lookup_from(&[("EPOIN_DEFAULT_ROLE", "principal")]));
        assert!(res.is_err());
    }
}
