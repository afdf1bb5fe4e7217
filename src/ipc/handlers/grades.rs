use crate::grading::{
    average_grade_points, average_score, format_grade_points, grade_and_comment,
    grade_for_fraction, grade_label, parse_score, percentage_of, resolve_color, resolve_grade,
    total_score, SchoolLevel,
};
use crate::ipc::error::ok;
use crate::ipc::handlers::setup::load_settings;
use crate::ipc::helpers::{load_bands, param_level_or, HandlerErr};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn score_param(req: &Request) -> Option<f64> {
    req.params.get("score").and_then(parse_score)
}

fn grades_resolve(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let level = param_level_or(req, SchoolLevel::Secondary)?;
    let settings = load_settings(state)?;
    let bands = load_bands(state, req, level)?;
    let band = resolve_grade(score_param(req), &bands);
    Ok(json!({
        "found": band.is_some(),
        "band": band,
        "label": grade_label(band, &settings.secondary_missing_label),
    }))
}

fn grades_color(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let level = param_level_or(req, SchoolLevel::Secondary)?;
    let bands = load_bands(state, req, level)?;
    let color = resolve_color(score_param(req), &bands);
    Ok(json!({ "color": color.as_str() }))
}

fn grades_grade_and_comment(
    state: &AppState,
    req: &Request,
) -> Result<serde_json::Value, HandlerErr> {
    let level = param_level_or(req, SchoolLevel::Primary)?;
    let Some(total) = req.params.get("total").and_then(parse_score) else {
        return Err(HandlerErr::bad_params("params.total must be numeric"));
    };
    let settings = load_settings(state)?;
    let bands = load_bands(state, req, level)?;
    let score = score_param(req);
    let band = grade_for_fraction(score, total, &bands);
    Ok(json!({
        "percentage": score.map(|s| percentage_of(s, total)),
        "found": band.is_some(),
        "band": band,
        "display": grade_and_comment(band, &settings.primary_missing_label),
    }))
}

fn grades_summary(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let level = param_level_or(req, SchoolLevel::Secondary)?;
    let Some(raw_scores) = req.params.get("scores").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("params.scores must be an array"));
    };
    let bands = load_bands(state, req, level)?;
    let scores: Vec<Option<f64>> = raw_scores.iter().map(parse_score).collect();

    let gpa = average_grade_points(scores.iter().copied(), &bands);

    Ok(json!({
        "total": total_score(scores.iter().copied()),
        "average": average_score(scores.iter().copied()),
        "averagePoints": gpa,
        "averagePointsDisplay": format_grade_points(gpa),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "grades.resolve" => grades_resolve(state, req),
        "grades.color" => grades_color(state, req),
        "grades.gradeAndComment" => grades_grade_and_comment(state, req),
        "grades.summary" => grades_summary(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
