use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::error::FormsError;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
}

impl AppState {
    pub fn conn(&self) -> Result<&Connection, FormsError> {
        self.db.as_ref().ok_or(FormsError::NoWorkspace)
    }
}
