//! `index.json`: id -> filename plus the summary fields used for fast listing.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{DevlogType, Entry, Priority, Status};
use crate::error::{DevlogError, Result};

pub const INDEX_FILE: &str = "index.json";
pub const INDEX_VERSION: &str = "1.0.0";

/// Denormalized summary of one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexRecord {
    pub filename: String,
    pub title: String,
    pub status: Status,
    #[serde(rename = "type")]
    pub devlog_type: DevlogType,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IndexRecord {
    pub fn from_entry(entry: &Entry, filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            title: entry.title.clone(),
            status: entry.status,
            devlog_type: entry.devlog_type,
            priority: entry.priority,
            created_at: entry.created_at,
            updated_at: entry.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryIndex {
    pub entries: BTreeMap<u64, IndexRecord>,
    /// High-water mark of every id ever stored; never moves backwards.
    pub last_id: u64,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl Default for EntryIndex {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            last_id: 0,
            version: INDEX_VERSION.to_string(),
            last_modified: None,
        }
    }
}

impl EntryIndex {
    /// Parse index text, skipping rows that don't deserialize.
    pub fn parse(content: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(content)
            .map_err(|e| DevlogError::MalformedData(format!("index.json: {}", e)))?;
        let object = value
            .as_object()
            .ok_or_else(|| DevlogError::MalformedData("index.json is not an object".to_string()))?;

        let mut index = EntryIndex::default();
        if let Some(rows) = object.get("entries").and_then(|v| v.as_object()) {
            for (key, row) in rows {
                let id = match key.parse::<u64>() {
                    Ok(id) => id,
                    Err(_) => {
                        tracing::warn!(key = %key, "Skipping index row with non-numeric id");
                        continue;
                    }
                };
                match serde_json::from_value::<IndexRecord>(row.clone()) {
                    Ok(record) => {
                        index.entries.insert(id, record);
                    }
                    Err(e) => tracing::warn!(id, error = %e, "Skipping unreadable index row"),
                }
            }
        }
        index.last_id = object.get("lastId").and_then(|v| v.as_u64()).unwrap_or(0);
        if let Some(version) = object.get("version").and_then(|v| v.as_str()) {
            index.version = version.to_string();
        }
        index.last_modified = object
            .get("lastModified")
            .and_then(|v| serde_json::from_value(v.clone()).ok());
        index.last_id = index.last_id.max(index.max_id());
        Ok(index)
    }

    pub fn max_id(&self) -> u64 {
        self.entries.keys().next_back().copied().unwrap_or(0)
    }

    pub fn get(&self, id: u64) -> Option<&IndexRecord> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    /// Insert or replace a row, returning the previous one.
    pub fn upsert(&mut self, id: u64, record: IndexRecord) -> Option<IndexRecord> {
        self.last_id = self.last_id.max(id);
        self.entries.insert(id, record)
    }

    pub fn remove(&mut self, id: u64) -> Option<IndexRecord> {
        self.entries.remove(&id)
    }

    /// Reserve the next id above the high-water mark.
    pub fn reserve_next_id(&mut self) -> u64 {
        self.last_id += 1;
        self.last_id
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(filename: &str) -> IndexRecord {
        IndexRecord::from_entry(&Entry::new("Index me", DevlogType::Task), filename)
    }

    #[test]
    fn test_upsert_raises_high_water_mark() {
        let mut index = EntryIndex::default();
        index.upsert(5, record("5.json"));
        assert_eq!(index.last_id, 5);
        index.remove(5);
        assert_eq!(index.last_id, 5);
        assert_eq!(index.reserve_next_id(), 6);
    }

    #[test]
    fn test_serialized_shape() {
        let mut index = EntryIndex::default();
        index.upsert(1, record("1.json"));
        let json = serde_json::to_value(&index).unwrap();
        assert_eq!(json["lastId"], 1);
        assert_eq!(json["version"], INDEX_VERSION);
        assert_eq!(json["entries"]["1"]["filename"], "1.json");
        assert_eq!(json["entries"]["1"]["type"], "task");
    }

    #[test]
    fn test_parse_round_trip() {
        let mut index = EntryIndex::default();
        index.upsert(3, record("3.json"));
        let text = serde_json::to_string(&index).unwrap();
        assert_eq!(EntryIndex::parse(&text).unwrap(), index);
    }

    #[test]
    fn test_parse_skips_bad_rows() {
        let mut index = EntryIndex::default();
        index.upsert(2, record("2.json"));
        let mut json = serde_json::to_value(&index).unwrap();
        json["entries"]["9"] = serde_json::json!({"filename": 12});
        json["entries"]["abc"] = serde_json::json!({});
        let parsed = EntryIndex::parse(&json.to_string()).unwrap();
        assert_eq!(parsed.len(), 1);
        assert!(parsed.contains(2));
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(
            EntryIndex::parse("<<<<<<< HEAD"),
            Err(DevlogError::MalformedData(_))
        ));
    }

    #[test]
    fn test_parse_repairs_low_last_id() {
        let text = r#"{"entries": {}, "lastId": 0, "version": "1.0.0"}"#;
        let mut parsed = EntryIndex::parse(text).unwrap();
        parsed.upsert(4, record("4.json"));
        let reparsed = EntryIndex::parse(&serde_json::to_string(&parsed).unwrap()).unwrap();
        assert_eq!(reparsed.last_id, 4);
    }
}
