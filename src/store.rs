//! Local equipment registry: a JSON document acting as a durable queue of
//! pending/completed records, shaped as sector -> group -> [record].
//! Single-writer assumption; read-modify-write with no file lock.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde_json::{Value, json};

use crate::types::ItemStatus;

pub const DEFAULT_PATH: &str = "data/equipment_registry.json";

#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    doc: Value,
}

/// Outcome of an `add`: inserted, or already present in the group.
#[derive(Debug, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Duplicate,
}

pub struct RegistryStats {
    pub total_count: u64,
    /// (sector, record count) in document order.
    pub sectors: Vec<(String, usize)>,
}

impl Registry {
    /// Load an existing registry file. A missing file is an error here;
    /// maintenance commands that bootstrap use [`Registry::load_or_create`].
    pub fn load(path: &Path) -> Result<Self, String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read registry {}: {e}", path.display()))?;
        let doc: Value = serde_json::from_str(&raw)
            .map_err(|e| format!("registry {} is not valid JSON: {e}", path.display()))?;
        if !doc.is_object() {
            return Err(format!(
                "registry {} must be a JSON object",
                path.display()
            ));
        }
        Ok(Self {
            path: path.to_path_buf(),
            doc,
        })
    }

    /// Load the registry, writing an empty one (just `_meta`) if absent.
    pub fn load_or_create(path: &Path) -> Result<Self, String> {
        if path.exists() {
            return Self::load(path);
        }
        let mut registry = Self {
            path: path.to_path_buf(),
            doc: json!({
                "_meta": { "lastUpdated": Utc::now().to_rfc3339(), "totalCount": 0 }
            }),
        };
        registry.save()?;
        Ok(registry)
    }

    /// Write the document back, refreshing `_meta.lastUpdated`.
    pub fn save(&mut self) -> Result<(), String> {
        if let Some(root) = self.doc.as_object_mut() {
            let meta = root.entry("_meta").or_insert_with(|| json!({}));
            if let Some(meta) = meta.as_object_mut() {
                meta.insert("lastUpdated".to_string(), json!(Utc::now().to_rfc3339()));
            }
        }
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("cannot create {}: {e}", parent.display()))?;
        }
        let pretty = serde_json::to_string_pretty(&self.doc)
            .map_err(|e| format!("cannot serialize registry: {e}"))?;
        std::fs::write(&self.path, pretty)
            .map_err(|e| format!("cannot write registry {}: {e}", self.path.display()))
    }

    /// Up to `limit` pending records, each enriched with the `sector` and
    /// `group` keys it was found under. Never yields `_meta`; non-object
    /// sectors and non-array groups are skipped, not errors.
    pub fn pending_items(&self, limit: usize) -> Vec<Value> {
        let mut pending = Vec::new();
        let Some(root) = self.doc.as_object() else {
            return pending;
        };
        for (sector, groups) in root {
            if sector == "_meta" {
                continue;
            }
            let Some(groups) = groups.as_object() else {
                continue;
            };
            for (group, items) in groups {
                let Some(items) = items.as_array() else {
                    continue;
                };
                for item in items {
                    if item.get("status").and_then(Value::as_str)
                        != Some(ItemStatus::Pending.as_str())
                    {
                        continue;
                    }
                    let mut enriched = item.clone();
                    if let Some(map) = enriched.as_object_mut() {
                        map.insert("sector".to_string(), json!(sector));
                        map.insert("group".to_string(), json!(group));
                    }
                    pending.push(enriched);
                    if pending.len() >= limit {
                        return pending;
                    }
                }
            }
        }
        pending
    }

    /// Set the status of the first record whose `type` matches, refreshing
    /// its `processedAt`. Returns false when no record matches.
    pub fn update_item_status(&mut self, item_type: &str, status: ItemStatus) -> bool {
        let Some(root) = self.doc.as_object_mut() else {
            return false;
        };
        for (sector, groups) in root.iter_mut() {
            if sector == "_meta" {
                continue;
            }
            let Some(groups) = groups.as_object_mut() else {
                continue;
            };
            for (_, items) in groups.iter_mut() {
                let Some(items) = items.as_array_mut() else {
                    continue;
                };
                for item in items.iter_mut() {
                    if item.get("type").and_then(Value::as_str) == Some(item_type)
                        && let Some(map) = item.as_object_mut()
                    {
                        map.insert("status".to_string(), json!(status.as_str()));
                        map.insert("processedAt".to_string(), json!(Utc::now().to_rfc3339()));
                        return true;
                    }
                }
            }
        }
        false
    }

    /// Insert a new pending record, creating sector and group containers
    /// on demand. Duplicate `type` within the group is skipped.
    pub fn add_item(
        &mut self,
        sector: &str,
        group: &str,
        item_type: &str,
        category: Option<&str>,
    ) -> Result<AddOutcome, String> {
        if sector == "_meta" {
            return Err("`_meta` is a reserved key, not a sector".to_string());
        }
        let Some(root) = self.doc.as_object_mut() else {
            return Err("registry document is not an object".to_string());
        };

        {
            let groups = root
                .entry(sector.to_string())
                .or_insert_with(|| json!({}));
            let Some(groups) = groups.as_object_mut() else {
                return Err(format!("sector `{sector}` is not an object"));
            };
            let items = groups.entry(group.to_string()).or_insert_with(|| json!([]));
            let Some(items) = items.as_array_mut() else {
                return Err(format!("group `{sector}/{group}` is not a list"));
            };
            let exists = items
                .iter()
                .any(|i| i.get("type").and_then(Value::as_str) == Some(item_type));
            if exists {
                return Ok(AddOutcome::Duplicate);
            }
            items.push(json!({
                "type": item_type,
                "status": ItemStatus::Pending.as_str(),
                "category": category.unwrap_or("unknown"),
                "addedAt": Utc::now().to_rfc3339(),
            }));
        }

        if let Some(meta) = root.get_mut("_meta").and_then(Value::as_object_mut) {
            let total = meta.get("totalCount").and_then(Value::as_u64).unwrap_or(0);
            meta.insert("totalCount".to_string(), json!(total + 1));
        }
        Ok(AddOutcome::Added)
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            total_count: 0,
            sectors: Vec::new(),
        };
        let Some(root) = self.doc.as_object() else {
            return stats;
        };
        stats.total_count = root
            .get("_meta")
            .and_then(|m| m.get("totalCount"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        for (sector, groups) in root {
            if sector == "_meta" {
                continue;
            }
            let Some(groups) = groups.as_object() else {
                continue;
            };
            let count = groups
                .values()
                .filter_map(Value::as_array)
                .map(Vec::len)
                .sum();
            stats.sectors.push((sector.clone(), count));
        }
        stats
    }

    /// Pending records in one sector as `(group, type)` pairs, or None
    /// when the sector key doesn't exist.
    pub fn pending_in_sector(&self, sector: &str) -> Option<Vec<(String, String)>> {
        if sector == "_meta" {
            return None;
        }
        let groups = self.doc.get(sector)?.as_object()?;
        let mut pending = Vec::new();
        for (group, items) in groups {
            let Some(items) = items.as_array() else {
                continue;
            };
            for item in items {
                if item.get("status").and_then(Value::as_str)
                    == Some(ItemStatus::Pending.as_str())
                    && let Some(item_type) = item.get("type").and_then(Value::as_str)
                {
                    pending.push((group.clone(), item_type.to_string()));
                }
            }
        }
        Some(pending)
    }

    pub fn sector_names(&self) -> Vec<String> {
        self.doc
            .as_object()
            .map(|root| {
                root.keys()
                    .filter(|k| k.as_str() != "_meta")
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn doc(&self) -> &Value {
        &self.doc
    }
}
