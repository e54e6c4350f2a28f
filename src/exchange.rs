//! JSON export and natural-key import of students and rules.

use anyhow::Context;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

use crate::backup;
use crate::model::{now_timestamp, PointTransaction, Rule, RuleKind, Student};

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("import file is not valid JSON: {0}")]
    BadJson(#[from] serde_json::Error),
    #[error("{0}")]
    BadShape(String),
    #[error("invalid backup bundle: {0:#}")]
    BadBundle(anyhow::Error),
    #[error("failed to read import file: {0:#}")]
    Io(anyhow::Error),
}

impl ImportError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadJson(_) => "bad_import_json",
            Self::BadShape(_) => "bad_import_shape",
            Self::BadBundle(_) => "bad_bundle",
            Self::Io(_) => "io_failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    Students,
    Rules,
}

impl Entity {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "students" => Some(Self::Students),
            "rules" => Some(Self::Rules),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExportDocument {
    pub students: Vec<Student>,
    pub rules: Vec<Rule>,
    pub transactions: Vec<PointTransaction>,
    #[serde(rename = "exportedAt")]
    pub exported_at: String,
}

impl ExportDocument {
    pub fn new(students: Vec<Student>, rules: Vec<Rule>, transactions: Vec<PointTransaction>) -> Self {
        Self {
            students,
            rules,
            transactions,
            exported_at: now_timestamp(),
        }
    }
}

/// Default download name, e.g. `epoin_backup_2024-08-21.json`.
pub fn backup_file_name(exported_at: &str) -> String {
    let date = exported_at.split('T').next().unwrap_or(exported_at);
    format!("epoin_backup_{}.json", date)
}

/// Writes `value` pretty-printed. A directory target gets the default backup name inside it.
pub fn write_export(value: &Value, out: &Path, exported_at: &str) -> anyhow::Result<PathBuf> {
    let target = if out.is_dir() {
        out.join(backup_file_name(exported_at))
    } else {
        out.to_path_buf()
    };
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.to_string_lossy()))?;
    }
    let text = serde_json::to_string_pretty(value).context("failed to serialize export")?;
    std::fs::write(&target, text)
        .with_context(|| format!("failed to write {}", target.to_string_lossy()))?;
    Ok(target)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudentImport {
    pub name: String,
    /// `None` leaves the stored photo untouched on update.
    pub photo_url: Option<Option<String>>,
    pub points: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleImport {
    pub description: String,
    pub points: i64,
    pub kind: RuleKind,
}

#[derive(Debug, Clone, Default)]
pub struct ImportPlan {
    pub students: Vec<StudentImport>,
    pub rules: Vec<RuleImport>,
    pub transactions_skipped: usize,
}

/// Loads an import source from disk: a backup bundle or a plain JSON file.
pub fn read_import_file(path: &Path) -> Result<Value, ImportError> {
    let is_zip = backup::is_zip_file(path).map_err(ImportError::Io)?;
    if is_zip {
        return backup::read_backup_bundle(path).map_err(ImportError::BadBundle);
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.to_string_lossy()))
        .map_err(ImportError::Io)?;
    Ok(serde_json::from_str(&text)?)
}

/// Shape-checks every record before anything is written.
pub fn plan_import(value: &Value, entity: Option<Entity>) -> Result<ImportPlan, ImportError> {
    match value {
        Value::Array(items) => {
            let entity = match entity.or_else(|| infer_entity(items)) {
                Some(e) => e,
                None if items.is_empty() => return Ok(ImportPlan::default()),
                None => {
                    return Err(ImportError::BadShape(
                        "cannot tell whether records are students or rules; pass entity".into(),
                    ))
                }
            };
            let mut plan = ImportPlan::default();
            match entity {
                Entity::Students => plan.students = parse_students(items)?,
                Entity::Rules => plan.rules = parse_rules(items)?,
            }
            Ok(plan)
        }
        Value::Object(doc) => {
            let students = optional_array(doc, "students")?;
            let rules = optional_array(doc, "rules")?;
            if students.is_none() && rules.is_none() {
                return Err(ImportError::BadShape(
                    "expected an array of records or an export document".into(),
                ));
            }
            let mut plan = ImportPlan::default();
            if entity != Some(Entity::Rules) {
                if let Some(items) = students {
                    plan.students = parse_students(items)?;
                }
            }
            if entity != Some(Entity::Students) {
                if let Some(items) = rules {
                    plan.rules = parse_rules(items)?;
                }
            }
            plan.transactions_skipped = doc
                .get("transactions")
                .and_then(|v| v.as_array())
                .map(|v| v.len())
                .unwrap_or(0);
            Ok(plan)
        }
        _ => Err(ImportError::BadShape(
            "expected an array of records or an export document".into(),
        )),
    }
}

fn optional_array<'a>(doc: &'a Map<String, Value>, key: &str) -> Result<Option<&'a Vec<Value>>, ImportError> {
    match doc.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => Ok(Some(items)),
        Some(_) => Err(ImportError::BadShape(format!("{key} must be an array"))),
    }
}

fn infer_entity(items: &[Value]) -> Option<Entity> {
    let first = items.first()?.as_object()?;
    if first.contains_key("description") {
        Some(Entity::Rules)
    } else if first.contains_key("name") {
        Some(Entity::Students)
    } else {
        None
    }
}

fn record<'a>(item: &'a Value, kind: &str, idx: usize) -> Result<&'a Map<String, Value>, ImportError> {
    item.as_object()
        .ok_or_else(|| ImportError::BadShape(format!("{kind}[{idx}] must be an object")))
}

fn required_text(obj: &Map<String, Value>, key: &str, kind: &str, idx: usize) -> Result<String, ImportError> {
    match obj.get(key).and_then(|v| v.as_str()).map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(ImportError::BadShape(format!(
            "{kind}[{idx}].{key} must be a non-empty string"
        ))),
    }
}

fn integer(obj: &Map<String, Value>, key: &str, kind: &str, idx: usize) -> Result<Option<i64>, ImportError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| {
            ImportError::BadShape(format!("{kind}[{idx}].{key} must be an integer"))
        }),
    }
}

fn parse_students(items: &[Value]) -> Result<Vec<StudentImport>, ImportError> {
    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let obj = record(item, "students", idx)?;
        let name = required_text(obj, "name", "students", idx)?;
        let photo_url = match obj.get("photo_url") {
            None => None,
            Some(Value::Null) => Some(None),
            Some(Value::String(s)) => Some(Some(s.clone())),
            Some(_) => {
                return Err(ImportError::BadShape(format!(
                    "students[{idx}].photo_url must be a string or null"
                )))
            }
        };
        let points = integer(obj, "points", "students", idx)?;
        out.push(StudentImport {
            name,
            photo_url,
            points,
        });
    }
    Ok(out)
}

fn parse_rules(items: &[Value]) -> Result<Vec<RuleImport>, ImportError> {
    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let obj = record(item, "rules", idx)?;
        let description = required_text(obj, "description", "rules", idx)?;
        let points = integer(obj, "points", "rules", idx)?.ok_or_else(|| {
            ImportError::BadShape(format!("rules[{idx}].points is required"))
        })?;
        let kind = obj
            .get("type")
            .and_then(|v| v.as_str())
            .and_then(RuleKind::parse)
            .ok_or_else(|| {
                ImportError::BadShape(format!(
                    "rules[{idx}].type must be achievement or violation"
                ))
            })?;
        // Stored the way the rule editor stores it: the sign follows the type.
        let points = kind.signed(points).ok_or_else(|| {
            ImportError::BadShape(format!("rules[{idx}].points is out of range"))
        })?;
        out.push(RuleImport {
            description,
            points,
            kind,
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, Serialize)]
pub struct RecordFailure {
    pub index: usize,
    pub key: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EntitySummary {
    pub inserted: usize,
    pub updated: usize,
    pub failed: Vec<RecordFailure>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportSummary {
    pub students: EntitySummary,
    pub rules: EntitySummary,
    #[serde(rename = "transactionsSkipped")]
    pub transactions_skipped: usize,
}

enum Upserted {
    Inserted,
    Updated,
}

/// Upserts every planned record by natural key. Failures are collected per record.
pub fn apply_import(conn: &Connection, user_id: &str, plan: &ImportPlan) -> ImportSummary {
    let mut summary = ImportSummary {
        transactions_skipped: plan.transactions_skipped,
        ..Default::default()
    };

    for (index, s) in plan.students.iter().enumerate() {
        match upsert_student(conn, user_id, s) {
            Ok(Upserted::Inserted) => summary.students.inserted += 1,
            Ok(Upserted::Updated) => summary.students.updated += 1,
            Err(e) => summary.students.failed.push(RecordFailure {
                index,
                key: s.name.clone(),
                message: e.to_string(),
            }),
        }
    }

    for (index, r) in plan.rules.iter().enumerate() {
        match upsert_rule(conn, user_id, r) {
            Ok(Upserted::Inserted) => summary.rules.inserted += 1,
            Ok(Upserted::Updated) => summary.rules.updated += 1,
            Err(e) => summary.rules.failed.push(RecordFailure {
                index,
                key: r.description.clone(),
                message: e.to_string(),
            }),
        }
    }

    summary
}

fn upsert_student(conn: &Connection, user_id: &str, s: &StudentImport) -> rusqlite::Result<Upserted> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM students WHERE user_id = ? AND name = ? ORDER BY rowid LIMIT 1",
            [user_id, s.name.as_str()],
            |r| r.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            // One statement, so a record is either fully overwritten or untouched.
            conn.execute(
                "UPDATE students SET
                    points = COALESCE(?1, points),
                    photo_url = CASE WHEN ?2 THEN ?3 ELSE photo_url END
                 WHERE id = ?4",
                (
                    s.points,
                    s.photo_url.is_some(),
                    s.photo_url.clone().flatten(),
                    &id,
                ),
            )?;
            Ok(Upserted::Updated)
        }
        None => {
            conn.execute(
                "INSERT INTO students(id, name, photo_url, points, user_id, created_at)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &s.name,
                    s.photo_url.clone().flatten(),
                    s.points.unwrap_or(0),
                    user_id,
                    now_timestamp(),
                ),
            )?;
            Ok(Upserted::Inserted)
        }
    }
}

fn upsert_rule(conn: &Connection, user_id: &str, r: &RuleImport) -> rusqlite::Result<Upserted> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM rules WHERE user_id = ? AND description = ? ORDER BY rowid LIMIT 1",
            [user_id, r.description.as_str()],
            |row| row.get(0),
        )
        .optional()?;

    match existing {
        Some(id) => {
            conn.execute(
                "UPDATE rules SET points = ?, type = ? WHERE id = ?",
                (r.points, r.kind.as_str(), &id),
            )?;
            Ok(Upserted::Updated)
        }
        None => {
            conn.execute(
                "INSERT INTO rules(id, description, points, type, user_id, created_at)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &r.description,
                    r.points,
                    r.kind.as_str(),
                    user_id,
                    now_timestamp(),
                ),
            )?;
            Ok(Upserted::Inserted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use serde_json::json;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        db::init_schema(&conn).expect("schema");
        conn
    }

    #[test]
    fn infers_entity_from_first_record() {
        let plan = plan_import(
            &json!([{ "description": "Terlambat", "points": -5, "type": "violation" }]),
            None,
        )
        .expect("plan");
        assert_eq!(plan.rules.len(), 1);
        assert!(plan.students.is_empty());

        let plan = plan_import(&json!([{ "name": "Ana", "points": 90 }]), None).expect("plan");
        assert_eq!(plan.students.len(), 1);
        assert_eq!(plan.students[0].points, Some(90));
        assert_eq!(plan.students[0].photo_url, None);
    }

    #[test]
    fn shape_errors_reject_whole_file() {
        let err = plan_import(
            &json!([{ "name": "Ana" }, { "name": "" }]),
            Some(Entity::Students),
        )
        .expect_err("blank name");
        assert_eq!(err.code(), "bad_import_shape");
        assert!(err.to_string().contains("students[1].name"));

        let err = plan_import(&json!([{ "description": "x", "points": "lots", "type": "achievement" }]), None)
            .expect_err("bad points");
        assert!(err.to_string().contains("rules[0].points"));

        let err = plan_import(&json!("students"), None).expect_err("scalar");
        assert_eq!(err.code(), "bad_import_shape");
    }

    #[test]
    fn export_document_is_accepted_and_transactions_skipped() {
        let doc = json!({
            "students": [{ "id": "old", "name": "Ana", "points": 90, "user_id": "someone", "created_at": "x" }],
            "rules": [],
            "transactions": [{ "id": "t1" }, { "id": "t2" }],
            "exportedAt": "2024-08-21T10:00:00.000Z"
        });
        let plan = plan_import(&doc, None).expect("plan");
        assert_eq!(plan.students.len(), 1);
        assert_eq!(plan.transactions_skipped, 2);
    }

    #[test]
    fn upsert_overwrites_by_natural_key() {
        let conn = setup();
        let first = plan_import(&json!([{ "name": "Ana", "points": 90 }, { "name": "Budi", "points": 60 }]), None)
            .expect("plan");
        let summary = apply_import(&conn, "u1", &first);
        assert_eq!(summary.students.inserted, 2);

        let second = plan_import(&json!([{ "name": "Ana", "points": 40, "photo_url": null }]), None)
            .expect("plan");
        let summary = apply_import(&conn, "u1", &second);
        assert_eq!(summary.students.inserted, 0);
        assert_eq!(summary.students.updated, 1);

        let students = db::list_students(&conn, "u1").expect("list");
        assert_eq!(students.len(), 2);
        let ana = students.iter().find(|s| s.name == "Ana").expect("ana");
        assert_eq!(ana.points, 40);

        // Same name under another user is a different record.
        let summary = apply_import(&conn, "u2", &second);
        assert_eq!(summary.students.inserted, 1);
    }

    #[test]
    fn partial_records_keep_unlisted_fields() {
        let conn = setup();
        let seed = plan_import(
            &json!([{ "name": "Ana", "points": 90, "photo_url": "https://cdn.test/ana.png" }]),
            None,
        )
        .expect("plan");
        apply_import(&conn, "u1", &seed);

        let points_only = plan_import(&json!([{ "name": "Ana", "points": 75 }]), None).expect("plan");
        let summary = apply_import(&conn, "u1", &points_only);
        assert_eq!(summary.students.updated, 1);
        let ana = db::list_students(&conn, "u1").expect("list").remove(0);
        assert_eq!(ana.points, 75);
        assert_eq!(ana.photo_url.as_deref(), Some("https://cdn.test/ana.png"));

        let photo_cleared = plan_import(&json!([{ "name": "Ana", "photo_url": null }]), None).expect("plan");
        apply_import(&conn, "u1", &photo_cleared);
        let ana = db::list_students(&conn, "u1").expect("list").remove(0);
        assert_eq!(ana.points, 75);
        assert_eq!(ana.photo_url, None);
    }

    #[test]
    fn rule_points_follow_type_and_reject_overflow() {
        let plan = plan_import(
            &json!([
                { "description": "Terlambat", "points": 5, "type": "violation" },
                { "description": "Juara kelas", "points": -10, "type": "achievement" }
            ]),
            None,
        )
        .expect("plan");
        assert_eq!(plan.rules[0].points, -5);
        assert_eq!(plan.rules[1].points, 10);

        let err = plan_import(
            &json!([{ "description": "x", "points": i64::MIN, "type": "violation" }]),
            None,
        )
        .expect_err("i64::MIN has no magnitude");
        assert_eq!(err.code(), "bad_import_shape");
        assert!(err.to_string().contains("rules[0].points"));
    }

    #[test]
    fn backup_file_name_uses_date() {
        assert_eq!(
            backup_file_name("2024-08-21T10:00:00.000Z"),
            "epoin_backup_2024-08-21.json"
        );
    }
}
