use rusqlite::Row;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub photo_url: Option<String>,
    pub points: i64,
    pub user_id: String,
    pub created_at: String,
}

pub const STUDENT_COLUMNS: &str = "id, name, photo_url, points, user_id, created_at";

impl Student {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            photo_url: row.get(2)?,
            points: row.get(3)?,
            user_id: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Achievement,
    Violation,
}

impl RuleKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "achievement" => Some(Self::Achievement),
            "violation" => Some(Self::Violation),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Achievement => "achievement",
            Self::Violation => "violation",
        }
    }

    /// Sign convention used by the rule editor: achievements add, violations subtract.
    /// `None` when the magnitude has no positive `i64` counterpart.
    pub fn signed(self, magnitude: i64) -> Option<i64> {
        let magnitude = magnitude.checked_abs()?;
        Some(match self {
            Self::Achievement => magnitude,
            Self::Violation => -magnitude,
        })
    }

    /// The point action under which rules of this kind are offered.
    pub fn action(self) -> PointAction {
        match self {
            Self::Achievement => PointAction::Add,
            Self::Violation => PointAction::Subtract,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rule {
    pub id: String,
    pub description: String,
    pub points: i64,
    #[serde(rename = "type")]
    pub kind: RuleKind,
    pub user_id: String,
    pub created_at: String,
}

pub const RULE_COLUMNS: &str = "id, description, points, type, user_id, created_at";

impl Rule {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let kind_raw: String = row.get(3)?;
        let kind = RuleKind::parse(&kind_raw).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown rule type: {kind_raw}").into(),
            )
        })?;
        Ok(Self {
            id: row.get(0)?,
            description: row.get(1)?,
            points: row.get(2)?,
            kind,
            user_id: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PointTransaction {
    pub id: String,
    pub student_id: String,
    pub points: i64,
    pub reason: String,
    pub user_id: String,
    pub created_at: String,
}

pub const TRANSACTION_COLUMNS: &str = "id, student_id, points, reason, user_id, created_at";

impl PointTransaction {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            student_id: row.get(1)?,
            points: row.get(2)?,
            reason: row.get(3)?,
            user_id: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Admin,
    Teacher,
}

impl Role {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "teacher" => Some(Self::Teacher),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Teacher => "teacher",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Profile {
    pub id: String,
    pub app_name: String,
    pub logo_url: Option<String>,
    pub favicon_url: Option<String>,
    pub role: Role,
}

impl Profile {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let role_raw: Option<String> = row.get(4)?;
        Ok(Self {
            id: row.get(0)?,
            app_name: row.get(1)?,
            logo_url: row.get(2)?,
            favicon_url: row.get(3)?,
            // Rows written before roles existed behave as teachers.
            role: role_raw
                .as_deref()
                .and_then(Role::parse)
                .unwrap_or(Role::Teacher),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointAction {
    Add,
    Subtract,
}

impl PointAction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "add" => Some(Self::Add),
            "subtract" => Some(Self::Subtract),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Subtract => "subtract",
        }
    }

    pub fn signed(self, magnitude: i64) -> i64 {
        match self {
            Self::Add => magnitude.saturating_abs(),
            Self::Subtract => -magnitude.saturating_abs(),
        }
    }
}

pub fn now_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
