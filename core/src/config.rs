//! Construction-time settings for an [`EventLogger`](crate::logger::EventLogger).

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use crate::backends::document::DEFAULT_DATABASE;
use crate::backends::file::DEFAULT_FILENAME;

pub const DEFAULT_GROUP: &str = "default";

/// Backend selection and layout.
///
/// A `connection_string` selects the document backend; without one, events
/// are written as JSON Lines under `directory`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EventItConfig {
    pub connection_string: Option<String>,
    pub database: String,
    pub directory: PathBuf,
    pub filename: String,
    pub separate_files: bool,
    pub groups: Vec<String>,
    pub default_group: String,
    pub exclude_none: bool,
    pub drop_database: bool,
    pub fsync: bool,
}

impl Default for EventItConfig {
    fn default() -> Self {
        Self {
            connection_string: None,
            database: DEFAULT_DATABASE.to_string(),
            directory: PathBuf::from("."),
            filename: DEFAULT_FILENAME.to_string(),
            separate_files: true,
            groups: Vec::new(),
            default_group: DEFAULT_GROUP.to_string(),
            exclude_none: true,
            drop_database: false,
            fsync: false,
        }
    }
}

impl EventItConfig {
    /// File backend rooted at `directory`, everything else default.
    pub fn in_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Document backend on `connection_string`, everything else default.
    pub fn with_connection_string(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: Some(connection_string.into()),
            ..Self::default()
        }
    }

    pub fn from_json_str(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).context("invalid eventit configuration")
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read configuration {}", path.display()))?;
        Self::from_json_str(&raw)
            .with_context(|| format!("failed to parse configuration {}", path.display()))
    }

    /// Configured groups with the default group first when it is missing.
    pub fn resolved_groups(&self) -> Vec<String> {
        let mut groups = Vec::with_capacity(self.groups.len() + 1);
        if !self.groups.contains(&self.default_group) {
            groups.push(self.default_group.clone());
        }
        groups.extend(self.groups.iter().cloned());
        groups
    }
}
