use crate::db;
use crate::grading::{GradeBand, SchoolLevel};
use crate::ipc::error::err;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn db_query(e: anyhow::Error) -> Self {
        tracing::error!(error = %e, "workspace query failed");
        Self::new("db_query_failed", e.to_string())
    }

    pub fn db_update(e: anyhow::Error) -> Self {
        tracing::error!(error = %e, "workspace update failed");
        Self::new("db_update_failed", e.to_string())
    }

    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

pub fn require_db(state: &AppState) -> Result<&Connection, HandlerErr> {
    state
        .db
        .as_ref()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn require_db_mut(state: &mut AppState) -> Result<&mut Connection, HandlerErr> {
    state
        .db
        .as_mut()
        .ok_or_else(|| HandlerErr::new("no_workspace", "select a workspace first"))
}

pub fn param_str<'a>(req: &'a Request, key: &str) -> Result<&'a str, HandlerErr> {
    let s = req
        .params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .ok_or_else(|| HandlerErr::bad_params(format!("missing params.{}", key)))?;
    if s.is_empty() {
        return Err(HandlerErr::bad_params(format!("params.{} must not be empty", key)));
    }
    Ok(s)
}

pub fn param_i64(req: &Request, key: &str) -> Result<i64, HandlerErr> {
    req.params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("params.{} must be an integer", key)))
}

/// Terms arrive as either "2" or 2 from different screens; stored as text.
pub fn param_term(req: &Request) -> Result<String, HandlerErr> {
    match req.params.get("term") {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(serde_json::Value::Number(n)) if n.is_i64() => Ok(n.to_string()),
        _ => Err(HandlerErr::bad_params(
            "params.term must be a non-empty string or integer",
        )),
    }
}

pub fn param_level(req: &Request) -> Result<SchoolLevel, HandlerErr> {
    let raw = param_str(req, "level")?;
    SchoolLevel::parse(raw).ok_or_else(|| {
        HandlerErr::bad_params("level must be one of: primary, secondary")
            .with_details(json!({ "level": raw }))
    })
}

pub fn param_level_or(req: &Request, default: SchoolLevel) -> Result<SchoolLevel, HandlerErr> {
    match req.params.get("level") {
        None | Some(serde_json::Value::Null) => Ok(default),
        Some(_) => param_level(req),
    }
}

pub fn parse_band_list(raw: &serde_json::Value, key: &str) -> Result<Vec<GradeBand>, HandlerErr> {
    serde_json::from_value::<Vec<GradeBand>>(raw.clone())
        .map_err(|e| HandlerErr::bad_params(format!("params.{} is not a band list: {}", key, e)))
}

/// Bands injected in `params.bands` win; otherwise the workspace table for
/// `level` is read fresh.
pub fn load_bands(
    state: &AppState,
    req: &Request,
    level: SchoolLevel,
) -> Result<Vec<GradeBand>, HandlerErr> {
    if let Some(raw) = req.params.get("bands").filter(|v| !v.is_null()) {
        return parse_band_list(raw, "bands");
    }
    let conn = require_db(state)?;
    db::bands_for_level(conn, level).map_err(HandlerErr::db_query)
}
