use crate::db::{self, MarkKey};
use crate::grading::{
    average_grade_points, average_score, find_mark, format_grade_points, grade_and_comment,
    grade_label, parse_score, percentage_of, resolve_color, resolve_grade, scores_of, total_score,
    GradeBand, Mark, SchoolLevel,
};
use crate::ipc::error::ok;
use crate::ipc::handlers::setup::{load_settings, WorkspaceSettings};
use crate::ipc::helpers::{
    load_bands, param_i64, param_level, param_str, param_term, require_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use serde::Serialize;
use serde_json::json;

const DEFAULT_OUT_OF: f64 = 100.0;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReportRow {
    subject_ref: String,
    mark_id: Option<String>,
    score: Option<f64>,
    percentage: Option<f64>,
    band: Option<GradeBand>,
    display: String,
    color: &'static str,
}

/// The value matched against bands: raw for secondary, percent of `out_of`
/// for primary.
fn band_score(level: SchoolLevel, score: Option<f64>, out_of: f64) -> Option<f64> {
    match level {
        SchoolLevel::Secondary => score,
        SchoolLevel::Primary => score.map(|s| percentage_of(s, out_of)),
    }
}

fn build_row(
    level: SchoolLevel,
    subject_ref: &str,
    mark: Option<&Mark>,
    out_of: f64,
    bands: &[GradeBand],
    settings: &WorkspaceSettings,
) -> ReportRow {
    let score = mark.and_then(|m| m.score);
    let lookup = band_score(level, score, out_of);
    let band = resolve_grade(lookup, bands);
    let display = match level {
        SchoolLevel::Primary => grade_and_comment(band, &settings.primary_missing_label),
        SchoolLevel::Secondary => grade_label(band, &settings.secondary_missing_label),
    };
    ReportRow {
        subject_ref: subject_ref.to_string(),
        mark_id: mark.map(|m| m.id.clone()),
        score,
        percentage: match level {
            SchoolLevel::Primary => lookup,
            SchoolLevel::Secondary => None,
        },
        band: band.cloned(),
        display,
        color: resolve_color(lookup, bands).as_str(),
    }
}

fn param_out_of(req: &Request) -> Result<f64, HandlerErr> {
    match req.params.get("outOf") {
        None | Some(serde_json::Value::Null) => Ok(DEFAULT_OUT_OF),
        Some(raw) => parse_score(raw)
            .filter(|v| *v >= 0.0)
            .ok_or_else(|| HandlerErr::bad_params("params.outOf must be a non-negative number")),
    }
}

fn student_total(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let level = param_level(req)?;
    let student_ref = param_str(req, "studentRef")?;
    let term = param_term(req)?;
    let year = param_i64(req, "year")?;
    let conn = require_db(state)?;
    let marks = db::marks_for_student(conn, level, student_ref, &term, year)
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "total": total_score(scores_of(&marks)) }))
}

fn subject_total(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let level = param_level(req)?;
    let term = param_term(req)?;
    let key = MarkKey {
        level,
        student_ref: param_str(req, "studentRef")?,
        subject_ref: param_str(req, "subjectRef")?,
        term: &term,
        year: param_i64(req, "year")?,
    };
    let conn = require_db(state)?;
    let marks = db::marks_for_subject(conn, &key).map_err(HandlerErr::db_query)?;
    Ok(json!({ "total": total_score(scores_of(&marks)) }))
}

fn student_summary(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let level = param_level(req)?;
    let student_ref = param_str(req, "studentRef")?;
    let term = param_term(req)?;
    let year = param_i64(req, "year")?;
    let out_of = param_out_of(req)?;
    let settings = load_settings(state)?;
    let conn = require_db(state)?;
    let bands = load_bands(state, req, level)?;
    let marks = db::marks_for_student(conn, level, student_ref, &term, year)
        .map_err(HandlerErr::db_query)?;

    let rows: Vec<ReportRow> = match req.params.get("subjects").filter(|v| !v.is_null()) {
        Some(raw) => {
            let Some(subjects) = raw.as_array() else {
                return Err(HandlerErr::bad_params("params.subjects must be an array"));
            };
            let mut rows = Vec::with_capacity(subjects.len());
            for s in subjects {
                let Some(subject_ref) = s.as_str().map(str::trim).filter(|s| !s.is_empty()) else {
                    return Err(HandlerErr::bad_params("params.subjects must hold subject refs")
                        .with_details(json!({ "subject": s })));
                };
                let mark = find_mark(&marks, subject_ref);
                rows.push(build_row(level, subject_ref, mark, out_of, &bands, &settings));
            }
            rows
        }
        None => marks
            .iter()
            .map(|m| build_row(level, &m.subject_ref, Some(m), out_of, &bands, &settings))
            .collect(),
    };

    // Aggregates cover every recorded mark; `subjects` only shapes the rows.
    let scores: Vec<Option<f64>> = scores_of(&marks).collect();
    let lookups = scores.iter().map(|s| band_score(level, *s, out_of));
    let gpa = average_grade_points(lookups, &bands);

    Ok(json!({
        "level": level,
        "studentRef": student_ref,
        "term": term,
        "year": year,
        "rows": rows,
        "total": total_score(scores.iter().copied()),
        "average": average_score(scores.iter().copied()),
        "averagePoints": gpa,
        "averagePointsDisplay": format_grade_points(gpa),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "reports.studentTotal" => student_total(state, req),
        "reports.subjectTotal" => subject_total(state, req),
        "reports.studentSummary" => student_summary(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
