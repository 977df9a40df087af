use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

/// One decoded request line. `params` defaults to JSON null when the caller
/// omits it, so handlers can probe fields without special-casing.
#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Everything that persists across requests: the selected workspace and its
/// open roster database. Both are unset until `workspace.select` succeeds.
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}
