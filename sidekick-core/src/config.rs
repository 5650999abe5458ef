use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Result, SyncError};

/// Connection settings for the remote workspace.
///
/// `databases` maps a local collection identifier (e.g. `newsletter.Post`)
/// to the Notion database id it mirrors. Entries are processed in order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotionConfig {
    #[serde(default, skip_serializing)]
    pub api_key: String,
    #[serde(default)]
    pub databases: Vec<DatabaseMapping>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseMapping {
    pub collection: String,
    pub database_id: String,
}

impl NotionConfig {
    pub fn database_id(&self, collection: &str) -> Result<&str> {
        self.databases
            .iter()
            .find(|m| m.collection == collection)
            .map(|m| m.database_id.as_str())
            .ok_or_else(|| SyncError::CollectionNotConfigured(collection.to_string()))
    }

    pub fn collections(&self) -> impl Iterator<Item = &str> {
        self.databases.iter().map(|m| m.collection.as_str())
    }

    pub fn trace_loaded(&self) {
        info!(
            api_key_set = !self.api_key.is_empty(),
            databases_count = self.databases.len(),
            "Loaded Notion config"
        );
        debug!(databases = ?self.databases, "Notion config loaded (full debug)");
    }
}
