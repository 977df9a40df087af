use crate::backup;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use std::path::PathBuf;

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "backup.export" => Some(handle_export(state, req)),
        "backup.restore" => Some(handle_restore(state, req)),
        _ => None,
    }
}

fn handle_export(state: &AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let out_path = match required_str(req, "outPath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };

    match backup::export_workspace_bundle(workspace, &out_path) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "bundlePath": out_path.to_string_lossy(),
                "bundleFormat": summary.bundle_format,
                "entryCount": summary.entry_count,
                "dbSha256": summary.db_sha256,
            }),
        ),
        Err(e) => err(&req.id, "backup_export_failed", format!("{e:?}"), None),
    }
}

/// Restores into a target workspace path and leaves the current selection
/// untouched; the caller re-selects the workspace to pick up the restored
/// database.
fn handle_restore(state: &mut AppState, req: &Request) -> serde_json::Value {
    let bundle_path = match required_str(req, "bundlePath") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };
    let target = match required_str(req, "targetWorkspace") {
        Ok(v) => PathBuf::from(v),
        Err(e) => return e,
    };

    // Restoring over the open workspace would swap the database file out
    // from under the live connection.
    if let Some(current) = state.workspace.as_ref() {
        if current == &target && state.db.is_some() {
            state.db = None;
            state.workspace = None;
        }
    }

    match backup::restore_workspace_bundle(&bundle_path, &target) {
        Ok(summary) => ok(
            &req.id,
            json!({
                "targetWorkspace": target.to_string_lossy(),
                "bundleFormat": summary.bundle_format_detected,
            }),
        ),
        Err(e) => err(&req.id, "backup_restore_failed", format!("{e:?}"), None),
    }
}
