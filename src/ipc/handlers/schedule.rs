use crate::ipc::error::{err, ok};
use crate::ipc::handlers::assignments::assignment_row_json;
use crate::ipc::helpers::{db_conn, required_str};
use crate::ipc::types::{AppState, Request};
use crate::schedule::{self, Recurrence, ScheduleError, ScopeOutcome, ViewType};
use rusqlite::{params, params_from_iter, OptionalExtension};
use serde_json::json;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "schedule.day" => Some(handle_day(state, req)),
        "schedule.occurrences" => Some(handle_occurrences(state, req)),
        _ => None,
    }
}

fn validation_err(req: &Request, e: ScheduleError) -> serde_json::Value {
    err(&req.id, e.code(), e.to_string(), None)
}

fn handle_day(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let view = match required_str(req, "view") {
        Ok(v) => match ViewType::parse(&v) {
            Ok(v) => v,
            Err(e) => return validation_err(req, e),
        },
        Err(e) => return e,
    };
    let target_id = match required_str(req, "targetId") {
        Ok(v) => v,
        Err(e) => return e,
    };
    let date = match required_str(req, "date") {
        Ok(v) => match schedule::parse_date(&v) {
            Ok(d) => d,
            Err(e) => return validation_err(req, e),
        },
        Err(e) => return e,
    };
    let tz_raw = req
        .params
        .get("timezone")
        .and_then(|v| v.as_str())
        .unwrap_or("UTC");
    let tz = match schedule::parse_timezone(tz_raw) {
        Ok(t) => t,
        Err(e) => return validation_err(req, e),
    };

    let scope = match schedule::resolve_scope(conn, view, &target_id, date, tz) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let scope = match scope {
        // Nothing in scope: reply without touching the assignments table.
        ScopeOutcome::Empty => {
            return ok(
                &req.id,
                json!({
                    "events": [],
                    "studentIds": [],
                    "empty": true,
                }),
            )
        }
        ScopeOutcome::Resolved(s) => s,
    };

    let placeholders = vec!["?"; scope.student_ids.len()].join(", ");
    let sql = format!(
        "SELECT a.id, a.student_id, s.first_name || ' ' || s.last_name,
                a.class_id, a.event_type, a.event_title, a.location,
                a.start_time, a.duration, a.end_time,
                a.recurrence, a.recurrence_end_date,
                a.notes, a.responsible_party, a.point_of_contact
         FROM assignments a
         JOIN students s ON s.id = a.student_id
         WHERE a.active = 1 AND s.active = 1
           AND a.start_time >= ? AND a.start_time < ?
           AND a.student_id IN ({})
         ORDER BY a.start_time, a.id",
        placeholders
    );
    let mut args: Vec<String> = vec![
        schedule::fmt_instant(&scope.day_start_utc),
        schedule::fmt_instant(&scope.day_end_utc),
    ];
    args.extend(scope.student_ids.iter().cloned());

    let mut stmt = match conn.prepare(&sql) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let events = match stmt.query_map(params_from_iter(args.iter()), assignment_row_json) {
        Ok(rows) => match rows.collect::<Result<Vec<_>, _>>() {
            Ok(v) => v,
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        },
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "events": events,
            "studentIds": scope.student_ids,
            "empty": false,
            "range": {
                "start": schedule::fmt_instant(&scope.day_start_utc),
                "end": schedule::fmt_instant(&scope.day_end_utc),
            },
        }),
    )
}

fn handle_occurrences(state: &AppState, req: &Request) -> serde_json::Value {
    let conn = match db_conn(state, req) {
        Ok(c) => c,
        Err(e) => return e,
    };
    let assignment_id = match required_str(req, "assignmentId") {
        Ok(v) => v,
        Err(e) => return e,
    };

    let row = match conn
        .query_row(
            "SELECT start_time, recurrence, recurrence_end_date
             FROM assignments WHERE id = ? AND active = 1",
            params![assignment_id],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()
    {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "assignment not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let (start_raw, recurrence_raw, end_raw) = row;

    let start = match schedule::parse_instant(&start_raw) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "invalid_record", e.to_string(), None),
    };
    let recurrence = match Recurrence::parse(&recurrence_raw) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "invalid_record", e.to_string(), None),
    };

    let instants: Vec<String> = if recurrence.is_recurring() {
        let Some(end_raw) = end_raw else {
            return err(&req.id, "invalid_record", "recurring assignment has no end date", None);
        };
        let end_date = match schedule::parse_date(&end_raw) {
            Ok(v) => v,
            Err(e) => return err(&req.id, "invalid_record", e.to_string(), None),
        };
        match schedule::occurrences(recurrence, start, end_date) {
            Ok(seq) => seq.map(|dt| schedule::fmt_instant(&dt)).collect(),
            Err(e) => return validation_err(req, e),
        }
    } else {
        vec![schedule::fmt_instant(&start)]
    };

    ok(
        &req.id,
        json!({
            "assignmentId": assignment_id,
            "recurrence": recurrence.as_str(),
            "count": instants.len(),
            "occurrences": instants,
        }),
    )
}
