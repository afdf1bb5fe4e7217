use crate::grading::{GradeBand, Mark, SchoolLevel};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

pub const DB_FILE_NAME: &str = "gradebook.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS grade_bands(
            id TEXT PRIMARY KEY,
            level TEXT NOT NULL,
            label TEXT NOT NULL,
            comment TEXT,
            min_score REAL NOT NULL,
            max_score REAL NOT NULL,
            grade_point REAL NOT NULL DEFAULT 0,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_grade_bands_level ON grade_bands(level, min_score)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marks(
            id TEXT PRIMARY KEY,
            level TEXT NOT NULL,
            student_ref TEXT NOT NULL,
            subject_ref TEXT NOT NULL,
            term TEXT NOT NULL,
            year INTEGER NOT NULL,
            score REAL,
            updated_at TEXT,
            UNIQUE(level, student_ref, subject_ref, term, year)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_marks_student ON marks(level, student_ref, term, year)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;
    Ok(())
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

fn band_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<GradeBand> {
    Ok(GradeBand {
        id: Some(r.get(0)?),
        label: r.get(1)?,
        comment: r.get(2)?,
        min_score: r.get(3)?,
        max_score: r.get(4)?,
        grade_point: r.get(5)?,
    })
}

/// Ordered by `min_score`, ties by insertion, so first-match lookup is stable.
pub fn bands_for_level(conn: &Connection, level: SchoolLevel) -> anyhow::Result<Vec<GradeBand>> {
    let mut stmt = conn.prepare(
        "SELECT id, label, comment, min_score, max_score, grade_point
         FROM grade_bands
         WHERE level = ?
         ORDER BY min_score, rowid",
    )?;
    let bands = stmt
        .query_map([level.as_str()], band_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(bands)
}

pub fn band_level(conn: &Connection, id: &str) -> anyhow::Result<Option<SchoolLevel>> {
    let level: Option<String> = conn
        .query_row("SELECT level FROM grade_bands WHERE id = ?", [id], |r| {
            r.get(0)
        })
        .optional()?;
    Ok(level.and_then(|l| SchoolLevel::parse(&l)))
}

/// Inserts when `band.id` is unset, otherwise updates in place. Returns the id.
pub fn band_upsert(conn: &Connection, level: SchoolLevel, band: &GradeBand) -> anyhow::Result<String> {
    let updated_at = now_rfc3339();
    match band.id.as_deref() {
        Some(id) => {
            let changed = conn.execute(
                "UPDATE grade_bands
                 SET label = ?, comment = ?, min_score = ?, max_score = ?, grade_point = ?, updated_at = ?
                 WHERE id = ? AND level = ?",
                rusqlite::params![
                    band.label.trim(),
                    band.comment,
                    band.min_score,
                    band.max_score,
                    band.grade_point,
                    updated_at,
                    id,
                    level.as_str()
                ],
            )?;
            if changed == 0 {
                anyhow::bail!("grade band not found: {id}");
            }
            Ok(id.to_string())
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO grade_bands(id, level, label, comment, min_score, max_score, grade_point, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
                rusqlite::params![
                    id,
                    level.as_str(),
                    band.label.trim(),
                    band.comment,
                    band.min_score,
                    band.max_score,
                    band.grade_point,
                    updated_at
                ],
            )?;
            Ok(id)
        }
    }
}

pub fn band_delete(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let changed = conn.execute("DELETE FROM grade_bands WHERE id = ?", [id])?;
    Ok(changed > 0)
}

/// Replaces the whole band table for one level in a single transaction.
pub fn bands_replace_level(
    conn: &mut Connection,
    level: SchoolLevel,
    bands: &[GradeBand],
) -> anyhow::Result<Vec<String>> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM grade_bands WHERE level = ?", [level.as_str()])?;
    let mut ids = Vec::with_capacity(bands.len());
    for b in bands {
        let fresh = GradeBand {
            id: None,
            ..b.clone()
        };
        ids.push(band_upsert(&tx, level, &fresh)?);
    }
    tx.commit()?;
    Ok(ids)
}

pub struct MarkKey<'a> {
    pub level: SchoolLevel,
    pub student_ref: &'a str,
    pub subject_ref: &'a str,
    pub term: &'a str,
    pub year: i64,
}

pub fn mark_upsert(conn: &Connection, key: &MarkKey<'_>, score: Option<f64>) -> anyhow::Result<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM marks
             WHERE level = ? AND student_ref = ? AND subject_ref = ? AND term = ? AND year = ?",
            rusqlite::params![
                key.level.as_str(),
                key.student_ref,
                key.subject_ref,
                key.term,
                key.year
            ],
            |r| r.get(0),
        )
        .optional()?;
    let updated_at = now_rfc3339();
    if let Some(id) = existing {
        conn.execute(
            "UPDATE marks SET score = ?, updated_at = ? WHERE id = ?",
            rusqlite::params![score, updated_at, id],
        )?;
        return Ok(id);
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO marks(id, level, student_ref, subject_ref, term, year, score, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        rusqlite::params![
            id,
            key.level.as_str(),
            key.student_ref,
            key.subject_ref,
            key.term,
            key.year,
            score,
            updated_at
        ],
    )?;
    Ok(id)
}

pub fn mark_delete(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let changed = conn.execute("DELETE FROM marks WHERE id = ?", [id])?;
    Ok(changed > 0)
}

fn mark_from_row(r: &rusqlite::Row<'_>) -> rusqlite::Result<Mark> {
    Ok(Mark {
        id: r.get(0)?,
        student_ref: r.get(1)?,
        subject_ref: r.get(2)?,
        term: r.get(3)?,
        year: r.get(4)?,
        score: r.get(5)?,
    })
}

/// One student's score set for a term, in entry order.
pub fn marks_for_student(
    conn: &Connection,
    level: SchoolLevel,
    student_ref: &str,
    term: &str,
    year: i64,
) -> anyhow::Result<Vec<Mark>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_ref, subject_ref, term, year, score
         FROM marks
         WHERE level = ? AND student_ref = ? AND term = ? AND year = ?
         ORDER BY rowid",
    )?;
    let marks = stmt
        .query_map(
            rusqlite::params![level.as_str(), student_ref, term, year],
            mark_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(marks)
}

pub fn marks_for_subject(
    conn: &Connection,
    key: &MarkKey<'_>,
) -> anyhow::Result<Vec<Mark>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_ref, subject_ref, term, year, score
         FROM marks
         WHERE level = ? AND student_ref = ? AND subject_ref = ? AND term = ? AND year = ?
         ORDER BY rowid",
    )?;
    let marks = stmt
        .query_map(
            rusqlite::params![
                key.level.as_str(),
                key.student_ref,
                key.subject_ref,
                key.term,
                key.year
            ],
            mark_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(marks)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value_json FROM settings WHERE key = ?", [key], |r| {
            r.get(0)
        })
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}
