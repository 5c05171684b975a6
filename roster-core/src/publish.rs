//! Local [`Publisher`]: one CSV file per sheet in an output directory.
//!
//! Alongside the sheets it keeps `sync_state.json`, recording when each sheet was
//! last published (RFC 3339, UTC).

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::write_table;
use crate::contract::{PublishError, Publisher, Table};

pub const SYNC_STATE_FILE: &str = "sync_state.json";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    #[serde(default)]
    pub last_published: BTreeMap<String, DateTime<Utc>>,
}

impl SyncState {
    pub fn load(path: &Path) -> Result<Self, PublishError> {
        match fs::read_to_string(path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Box::new(e)),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), PublishError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryPublisher {
    dir: PathBuf,
}

impl DirectoryPublisher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn sheet_path(&self, sheet: &str) -> PathBuf {
        self.dir.join(format!("{sheet}.csv"))
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(SYNC_STATE_FILE)
    }

    pub fn state(&self) -> Result<SyncState, PublishError> {
        SyncState::load(&self.state_path())
    }
}

#[async_trait]
impl Publisher for DirectoryPublisher {
    async fn publish(&self, sheet: &str, table: &Table) -> Result<(), PublishError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.sheet_path(sheet);
        write_table(&path, table)?;

        let mut state = self.state()?;
        state.last_published.insert(sheet.to_string(), Utc::now());
        state.save(&self.state_path())?;

        info!(sheet, path = %path.display(), rows = table.len(), "Published sheet");
        Ok(())
    }
}
