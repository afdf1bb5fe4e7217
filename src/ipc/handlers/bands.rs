use crate::db;
use crate::grading::{validate_bands, GradeBand};
use crate::ipc::error::ok;
use crate::ipc::handlers::setup::load_settings;
use crate::ipc::helpers::{
    param_level, param_str, parse_band_list, require_db, require_db_mut, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn check_bands(bands: &[GradeBand], reject_overlaps: bool) -> Result<(), HandlerErr> {
    validate_bands(bands, reject_overlaps).map_err(|e| {
        tracing::info!(reason = %e, "band table rejected");
        HandlerErr::new("invalid_bands", e.to_string()).with_details(e.details())
    })
}

fn bands_list(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let level = param_level(req)?;
    let conn = require_db(state)?;
    let bands = db::bands_for_level(conn, level).map_err(HandlerErr::db_query)?;
    Ok(json!({ "level": level, "bands": bands }))
}

fn bands_upsert(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let level = param_level(req)?;
    let settings = load_settings(state)?;
    let conn = require_db(state)?;
    let raw = req
        .params
        .get("band")
        .ok_or_else(|| HandlerErr::bad_params("missing params.band"))?;
    let band: GradeBand = serde_json::from_value(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("params.band is not a band: {}", e)))?;

    // Validate the table as it will look after the write.
    let mut candidate = db::bands_for_level(conn, level).map_err(HandlerErr::db_query)?;
    match band.id.as_deref() {
        Some(id) => {
            let Some(slot) = candidate.iter_mut().find(|b| b.id.as_deref() == Some(id)) else {
                return Err(HandlerErr::new("not_found", "grade band not found")
                    .with_details(json!({ "id": id, "level": level })));
            };
            *slot = band.clone();
        }
        None => candidate.push(band.clone()),
    }
    check_bands(&candidate, settings.reject_overlapping_bands)?;

    let id = db::band_upsert(conn, level, &band).map_err(HandlerErr::db_update)?;
    Ok(json!({ "id": id }))
}

fn bands_delete(state: &AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let id = param_str(req, "id")?;
    let conn = require_db(state)?;
    let not_found = || {
        HandlerErr::new("not_found", "grade band not found").with_details(json!({ "id": id }))
    };
    let level = db::band_level(conn, id)
        .map_err(HandlerErr::db_query)?
        .ok_or_else(not_found)?;
    if !db::band_delete(conn, id).map_err(HandlerErr::db_update)? {
        return Err(not_found());
    }
    tracing::info!(level = level.as_str(), id, "grade band deleted");
    Ok(json!({ "ok": true, "level": level }))
}

fn bands_replace(state: &mut AppState, req: &Request) -> Result<serde_json::Value, HandlerErr> {
    let level = param_level(req)?;
    let settings = load_settings(state)?;
    let raw = req
        .params
        .get("bands")
        .ok_or_else(|| HandlerErr::bad_params("missing params.bands"))?;
    let bands = parse_band_list(raw, "bands")?;
    check_bands(&bands, settings.reject_overlapping_bands)?;

    let conn = require_db_mut(state)?;
    let ids = db::bands_replace_level(conn, level, &bands).map_err(HandlerErr::db_update)?;
    tracing::info!(level = level.as_str(), count = ids.len(), "band table replaced");
    Ok(json!({ "ids": ids }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "bands.list" => bands_list(state, req),
        "bands.upsert" => bands_upsert(state, req),
        "bands.delete" => bands_delete(state, req),
        "bands.replace" => bands_replace(state, req),
        _ => return None,
    };
    Some(match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => e.response(&req.id),
    })
}
