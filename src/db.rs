use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::model::{
    PointTransaction, Profile, Rule, Student, RULE_COLUMNS, STUDENT_COLUMNS, TRANSACTION_COLUMNS,
};

pub const DB_FILE: &str = "epoin.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            photo_url TEXT,
            points INTEGER NOT NULL DEFAULT 0,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    // Workspaces from the single-user layout have no owner column. Add it before indexing.
    ensure_students_user_id(conn)?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_user ON students(user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_user_name ON students(user_id, name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS rules(
            id TEXT PRIMARY KEY,
            description TEXT NOT NULL,
            points INTEGER NOT NULL,
            type TEXT NOT NULL CHECK(type IN ('achievement', 'violation')),
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_rules_user ON rules(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS point_transactions(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            points INTEGER NOT NULL,
            reason TEXT NOT NULL,
            user_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_point_transactions_student ON point_transactions(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_point_transactions_user ON point_transactions(user_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS profiles(
            id TEXT PRIMARY KEY,
            app_name TEXT NOT NULL,
            logo_url TEXT,
            favicon_url TEXT,
            role TEXT
        )",
        [],
    )?;
    ensure_profiles_role(conn)?;

    Ok(())
}

fn ensure_students_user_id(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "user_id")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE students ADD COLUMN user_id TEXT NOT NULL DEFAULT ''",
        [],
    )?;
    Ok(())
}

fn ensure_profiles_role(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "profiles", "role")? {
        return Ok(());
    }
    conn.execute("ALTER TABLE profiles ADD COLUMN role TEXT", [])?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Students unowned by the single-user layout are adopted by the first user who signs in.
pub fn claim_unowned_students(conn: &Connection, user_id: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE students SET user_id = ? WHERE user_id = ''",
        [user_id],
    )
}

pub fn list_students(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<Student>> {
    let sql = format!(
        "SELECT {STUDENT_COLUMNS} FROM students WHERE user_id = ? ORDER BY created_at DESC, rowid DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id], Student::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_student(
    conn: &Connection,
    user_id: &str,
    student_id: &str,
) -> rusqlite::Result<Option<Student>> {
    let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ? AND user_id = ?");
    conn.query_row(&sql, [student_id, user_id], Student::from_row)
        .optional()
}

pub fn list_rules(conn: &Connection, user_id: &str) -> rusqlite::Result<Vec<Rule>> {
    let sql = format!("SELECT {RULE_COLUMNS} FROM rules WHERE user_id = ? ORDER BY created_at, rowid");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id], Rule::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_rule(conn: &Connection, user_id: &str, rule_id: &str) -> rusqlite::Result<Option<Rule>> {
    let sql = format!("SELECT {RULE_COLUMNS} FROM rules WHERE id = ? AND user_id = ?");
    conn.query_row(&sql, [rule_id, user_id], Rule::from_row)
        .optional()
}

pub fn list_transactions(
    conn: &Connection,
    user_id: &str,
) -> rusqlite::Result<Vec<PointTransaction>> {
    let sql = format!(
        "SELECT {TRANSACTION_COLUMNS} FROM point_transactions WHERE user_id = ? ORDER BY created_at, rowid"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([user_id], PointTransaction::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn student_history(
    conn: &Connection,
    user_id: &str,
    student_id: &str,
) -> rusqlite::Result<Vec<PointTransaction>> {
    let sql = format!(
        "SELECT {TRANSACTION_COLUMNS} FROM point_transactions
         WHERE student_id = ? AND user_id = ?
         ORDER BY created_at DESC, rowid DESC"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id, user_id], PointTransaction::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_profile(conn: &Connection, user_id: &str) -> rusqlite::Result<Option<Profile>> {
    conn.query_row(
        "SELECT id, app_name, logo_url, favicon_url, role FROM profiles WHERE id = ?",
        [user_id],
        Profile::from_row,
    )
    .optional()
}

pub fn insert_profile(conn: &Connection, profile: &Profile) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO profiles(id, app_name, logo_url, favicon_url, role) VALUES(?, ?, ?, ?, ?)",
        (
            &profile.id,
            &profile.app_name,
            &profile.logo_url,
            &profile.favicon_url,
            profile.role.as_str(),
        ),
    )?;
    Ok(())
}
