use crate::db::{self, MarkKey};
use crate::grading::parse_score;
use crate::ipc::error::ok;
use crate::ipc::helpers::{param_i64, param_level, param_str, param_term, require_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

/// Stored scores must be numeric, or null for "no mark yet".
fn parse_stored_score(raw: Option<&serde_json::Value>) -> Result<Option<f64>, HandlerErr> {
    let Some(raw) = raw.filter(|v| !v.is_null()) else {
        return Ok(None);
    };
    let Some(v) = parse_score(raw) else {
        return Err(HandlerErr::bad_params("score must be numeric or null")
            .with_details(json!({ "score": raw })));
    };
    if v < 0.0 {
        return Err(HandlerErr::bad_params("negative marks are not allowed")
            .with_details(json!({ "score": v })));
    }
    Ok(Some(v))
}

fn marks_upsert(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let level = param_level(req)?;
    let student_ref = param_str(req, "studentRef")?;
    let subject_ref = param_str(req, "subjectRef")?;
    let term = param_term(req)?;
    let year = param_i64(req, "year")?;
    let score = parse_stored_score(req.params.get("score"))?;
    let conn = require_db(state)?;

    let key = MarkKey {
        level,
        student_ref,
        subject_ref,
        term: &term,
        year,
    };
    let id = db::mark_upsert(conn, &key, score).map_err(HandlerErr::db_update)?;
    Ok(json!({ "id": id, "score": score }))
}

fn marks_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let id = param_str(req, "id")?;
    let conn = require_db(state)?;
    if !db::mark_delete(conn, id).map_err(HandlerErr::db_update)? {
        return Err(HandlerErr::new("not_found", "mark not found").with_details(json!({ "id": id })));
    }
    Ok(json!({ "ok": true }))
}

fn marks_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let level = param_level(req)?;
    let student_ref = param_str(req, "studentRef")?;
    let term = param_term(req)?;
    let year = param_i64(req, "year")?;
    let conn = require_db(state)?;
    let marks = db::marks_for_student(conn, level, student_ref, &term, year)
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "marks": marks }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "marks.upsert" => marks_upsert(state, req),
        "marks.delete" => marks_delete(state, req),
        "marks.list" => marks_list(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
