use crate::db;
use crate::grading::{PRIMARY_MISSING_LABEL, SECONDARY_MISSING_LABEL};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::HandlerErr;
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Grading,
    Display,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "grading" => Some(Self::Grading),
            "display" => Some(Self::Display),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Grading => "setup.grading",
            Self::Display => "setup.display",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Grading => json!({
            "rejectOverlappingBands": true
        }),
        SetupSection::Display => json!({
            "secondaryMissingLabel": SECONDARY_MISSING_LABEL,
            "primaryMissingLabel": PRIMARY_MISSING_LABEL
        }),
    }
}

/// Effective settings the grading handlers run with.
#[derive(Debug, Clone)]
pub struct WorkspaceSettings {
    pub reject_overlapping_bands: bool,
    pub secondary_missing_label: String,
    pub primary_missing_label: String,
}

impl Default for WorkspaceSettings {
    fn default() -> Self {
        Self {
            reject_overlapping_bands: true,
            secondary_missing_label: SECONDARY_MISSING_LABEL.to_string(),
            primary_missing_label: PRIMARY_MISSING_LABEL.to_string(),
        }
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_bool(v: &Value, key: &str) -> Result<bool, String> {
    v.as_bool().ok_or_else(|| format!("{} must be boolean", key))
}

fn parse_string_max(v: &Value, key: &str, max_len: usize) -> Result<String, String> {
    let s = v.as_str().ok_or_else(|| format!("{} must be string", key))?;
    let s = s.trim();
    if s.len() > max_len {
        return Err(format!("{} length must be <= {}", key, max_len));
    }
    Ok(s.to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Grading => match k.as_str() {
                "rejectOverlappingBands" => {
                    obj.insert(k.clone(), Value::Bool(parse_bool(v, k)?));
                }
                _ => return Err(format!("unknown grading field: {}", k)),
            },
            SetupSection::Display => match k.as_str() {
                "secondaryMissingLabel" | "primaryMissingLabel" => {
                    let s = parse_string_max(v, k, 16)?;
                    if s.is_empty() {
                        return Err(format!("{} must not be empty", k));
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                _ => return Err(format!("unknown display field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults field by field.
            for (k, v) in saved_obj {
                let mut single = Map::new();
                single.insert(k.clone(), v.clone());
                if let Err(msg) = merge_section_patch(section, &mut current, &single) {
                    tracing::warn!(section = section.key(), %msg, "ignoring saved setting");
                }
            }
        }
    }
    Ok(current)
}

/// Defaults when no workspace is open.
pub fn load_settings(state: &AppState) -> Result<WorkspaceSettings, HandlerErr> {
    let Some(conn) = state.db.as_ref() else {
        return Ok(WorkspaceSettings::default());
    };
    let grading = load_section(conn, SetupSection::Grading).map_err(HandlerErr::db_query)?;
    let display = load_section(conn, SetupSection::Display).map_err(HandlerErr::db_query)?;
    let defaults = WorkspaceSettings::default();
    Ok(WorkspaceSettings {
        reject_overlapping_bands: grading
            .get("rejectOverlappingBands")
            .and_then(|v| v.as_bool())
            .unwrap_or(defaults.reject_overlapping_bands),
        secondary_missing_label: display
            .get("secondaryMissingLabel")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or(defaults.secondary_missing_label),
        primary_missing_label: display
            .get("primaryMissingLabel")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or(defaults.primary_missing_label),
    })
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let grading = match load_section(conn, SetupSection::Grading) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let display = match load_section(conn, SetupSection::Display) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "grading": grading,
            "display": display
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    tracing::info!(section = section.key(), "setup section updated");
    ok(&req.id, json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
