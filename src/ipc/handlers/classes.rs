use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{db_conn, now_ts, parse_bool, parse_opt_i64, parse_opt_string, required_str};
use crate::ipc::types::{AppState, Request};
use crate::schedule;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "classes.list" => Some(handle_list(state, req)),
        "classes.create" => Some(handle_create(state, req)),
        "classes.update" => Some(handle_update(state, req)),
        "classes.deactivate" => Some(handle_deactivate(state, req)),
        _ => None,
    }
}

fn handle_list(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let program_id = match parse_opt_string(req.params.get("programId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("programId {}", m), None),
    };
    let include_inactive = match parse_bool(req.params.get("includeInactive"), false) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("includeInactive {}", m), None),
    };

    let mut sql = String::from(
        "SELECT id, name, code, department, program_id, location, default_duration, event_type, active
         FROM classes WHERE 1 = 1",
    );
    let mut args: Vec<String> = Vec::new();
    if let Some(pid) = &program_id {
        sql.push_str(" AND program_id = ?");
        args.push(pid.clone());
    }
    if !include_inactive {
        sql.push_str(" AND active = 1");
    }
    sql.push_str(" ORDER BY name");

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let classes = match stmt.query_map(params_from_iter(args.iter()), |r| {
        Ok(json!({
            "id": r.get::<_, String>(0)?,
            "name": r.get::<_, String>(1)?,
            "code": r.get::<_, Option<String>>(2)?,
            "department": r.get::<_, Option<String>>(3)?,
            "programId": r.get::<_, Option<String>>(4)?,
            "location": r.get::<_, Option<String>>(5)?,
            "defaultDuration": r.get::<_, Option<i64>>(6)?,
            "eventType": r.get::<_, Option<String>>(7)?,
            "active": r.get::<_, i64>(8)? != 0,
        }))
    }) {
        Ok(rows) => match rows.collect::<Result<Vec<_>, _>>() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(&req.id, json!({ "classes": classes }))
}

fn handle_create(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let name = match required_str(req, "name") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let code = match parse_opt_string(req.params.get("code")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("code {}", m), None),
    };
    let department = match parse_opt_string(req.params.get("department")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("department {}", m), None),
    };
    let program_id = match parse_opt_string(req.params.get("programId")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("programId {}", m), None),
    };
    let location = match parse_opt_string(req.params.get("location")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("location {}", m), None),
    };
    let default_duration = match parse_opt_i64(req.params.get("defaultDuration")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("defaultDuration {}", m), None),
    };
    if let Some(d) = default_duration {
        if !(schedule::MIN_DURATION_MINUTES..=schedule::MAX_DURATION_MINUTES).contains(&d) {
            return err(&req.id, "duration_out_of_range", "defaultDuration must be 1..=720 minutes", None);
        }
    }
    let event_type = match parse_opt_string(req.params.get("eventType")) {
        Ok(v) => v,
        Err(m) => return err(&req.id, "bad_params", format!("eventType {}", m), None),
    };
    if let Some(et) = &event_type {
        if !schedule::is_event_type(et) {
            return err(
                &req.id,
                "bad_params",
                format!("unknown eventType: {}", et),
                Some(json!({ "allowed": schedule::EVENT_TYPES })),
            );
        }
    }

    if let Some(pid) = &program_id {
        let exists = match conn
            .query_row("SELECT 1 FROM programs WHERE id = ?", params![pid], |_r| Ok(()))
            .optional()
        {
            Ok(v) => v.is_some(),
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        };
        if !exists {
            return err(&req.id, "not_found", "program not found", None);
        }
    }

    let class_id = Uuid::new_v4().to_string();
    let ts = now_ts();
    if let Err(e) = conn.execute(
        "INSERT INTO classes(id, name, code, department, program_id, location, default_duration, event_type, active, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)",
        params![class_id, name, code, department, program_id, location, default_duration, event_type, ts, ts],
    ) {
        return err(&req.id, "db_insert_failed", e.to_string(), None);
    }
    ok(&req.id, json!({ "classId": class_id }))
}

fn handle_update(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };

    let exists = match conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", params![class_id], |_r| Ok(()))
        .optional()
    {
        Ok(v) => v.is_some(),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if !exists {
        return err(&req.id, "not_found", "class not found", None);
    }

    // Validate all fields before applying any; the patch lands in a single
    // statement so a rejected field leaves the row untouched.
    let mut sets: Vec<String> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();
    if let Some(v) = patch.get("name") {
        let name = match v.as_str().map(|s| s.trim()) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => return err(&req.id, "bad_params", "patch.name must not be empty", None),
        };
        sets.push("name = ?".to_string());
        values.push(SqlValue::Text(name));
    }
    for (key, column) in [
        ("code", "code"),
        ("department", "department"),
        ("location", "location"),
    ] {
        if patch.contains_key(key) {
            let value = match parse_opt_string(patch.get(key)) {
                Ok(v) => v,
                Err(m) => return err(&req.id, "bad_params", format!("patch.{} {}", key, m), None),
            };
            sets.push(format!("{} = ?", column));
            values.push(value.map_or(SqlValue::Null, SqlValue::Text));
        }
    }
    if patch.contains_key("defaultDuration") {
        let value = match parse_opt_i64(patch.get("defaultDuration")) {
            Ok(v) => v,
            Err(m) => return err(&req.id, "bad_params", format!("patch.defaultDuration {}", m), None),
        };
        if let Some(d) = value {
            if !(schedule::MIN_DURATION_MINUTES..=schedule::MAX_DURATION_MINUTES).contains(&d) {
                return err(&req.id, "duration_out_of_range", "patch.defaultDuration must be 1..=720 minutes", None);
            }
        }
        sets.push("default_duration = ?".to_string());
        values.push(value.map_or(SqlValue::Null, SqlValue::Integer));
    }
    if patch.contains_key("eventType") {
        let value = match parse_opt_string(patch.get("eventType")) {
            Ok(v) => v,
            Err(m) => return err(&req.id, "bad_params", format!("patch.eventType {}", m), None),
        };
        if let Some(et) = &value {
            if !schedule::is_event_type(et) {
                return err(
                    &req.id,
                    "bad_params",
                    format!("unknown eventType: {}", et),
                    Some(json!({ "allowed": schedule::EVENT_TYPES })),
                );
            }
        }
        sets.push("event_type = ?".to_string());
        values.push(value.map_or(SqlValue::Null, SqlValue::Text));
    }

    if !sets.is_empty() {
        sets.push("updated_at = ?".to_string());
        values.push(SqlValue::Text(now_ts()));
        values.push(SqlValue::Text(class_id.clone()));
        let sql = format!("UPDATE classes SET {} WHERE id = ?", sets.join(", "));
        if let Err(e) = conn.execute(&sql, params_from_iter(values)) {
            return err(&req.id, "db_update_failed", e.to_string(), None);
        }
    }

    ok(&req.id, json!({ "classId": class_id }))
}

fn handle_deactivate(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let class_id = match required_str(req, "classId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let changed = match conn.execute(
        "UPDATE classes SET active = 0, updated_at = ? WHERE id = ?",
        params![now_ts(), class_id],
    ) {
        Ok(n) => n,
        Err(e) => return err(&req.id, "db_update_failed", e.to_string(), None),
    };
    if changed == 0 {
        return err(&req.id, "not_found", "class not found", None);
    }
    ok(&req.id, json!({ "classId": class_id }))
}
