//! Persisted device registry and entity state cache.
//!
//! Both stores are JSON documents keyed by id. Writes merge into the
//! existing entry instead of replacing it, so partial updates from
//! different sources accumulate. Snapshots are written to disk in the
//! background and on shutdown; a failed write keeps the in-memory state.

use chrono::{DateTime, Utc};
use rfxcom2mqtt_common::error::{BridgeError, PersistError};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// The entity id a radio event or command addresses.
///
/// A group event gets its own entity distinct from the per-unit ones. A
/// unit-addressed event is scoped under the device id.
pub fn entity_id(device_id: &str, unit_code: Option<&str>, is_group: bool) -> String {
    if is_group {
        format!("{}_group", device_id)
    } else if let Some(unit) = unit_code {
        format!("{}/{}", device_id, unit)
    } else {
        device_id.to_string()
    }
}

/// Registry record for a device seen on the radio.
///
/// Identity fields are written once when the device is first seen and never
/// overwritten by later events. Entity lists and per-component metadata grow
/// as discovery detects capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceState {
    pub id: String,

    #[serde(rename = "type")]
    pub device_type: String,

    pub subtype: u8,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtype_label: Option<String>,

    /// Display name; the configured friendly name when one exists.
    pub name: String,

    /// Identity as first seen, kept when the device is renamed.
    pub original_name: String,

    /// Entity ids observed for this device.
    #[serde(default)]
    pub entities: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sensors: BTreeMap<String, SensorMeta>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub switches: BTreeMap<String, SwitchMeta>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub binary_sensors: BTreeMap<String, BinarySensorMeta>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub covers: BTreeMap<String, CoverMeta>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selects: BTreeMap<String, SelectMeta>,

    #[serde(default = "Utc::now")]
    pub last_seen: DateTime<Utc>,
}

impl DeviceState {
    /// Build the first-seen record for a radio event.
    pub fn from_event(event: &crate::event::RadioEvent) -> Self {
        Self {
            id: event.id.clone(),
            device_type: event.device_type.clone(),
            subtype: event.subtype,
            subtype_label: event.subtype_label.clone(),
            name: event.id.clone(),
            original_name: event.id.clone(),
            entities: Vec::new(),
            sensors: BTreeMap::new(),
            switches: BTreeMap::new(),
            binary_sensors: BTreeMap::new(),
            covers: BTreeMap::new(),
            selects: BTreeMap::new(),
            last_seen: Utc::now(),
        }
    }

    /// Record an entity id, ignoring duplicates.
    pub fn add_entity(&mut self, entity_id: &str) -> bool {
        if self.entities.iter().any(|e| e == entity_id) {
            return false;
        }
        self.entities.push(entity_id.to_string());
        true
    }
}

/// Sensor entity metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorMeta {
    pub name: String,

    /// Property of the entity state the sensor reads.
    pub property: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_of_measurement: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_class: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_category: Option<String>,
}

/// Switch entity metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SwitchMeta {
    pub name: String,
    pub property: String,
    pub payload_on: String,
    pub payload_off: String,
}

/// Binary sensor entity metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BinarySensorMeta {
    pub name: String,
    pub property: String,
    pub payload_on: String,
    pub payload_off: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
}

/// Cover entity metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverMeta {
    pub name: String,
}

/// Select entity metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SelectMeta {
    pub name: String,
    pub property: String,
    pub options: Vec<String>,
}

/// A JSON document store with merge-on-write semantics.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    entries: RwLock<Map<String, Value>>,
    dirty: AtomicBool,
}

impl JsonStore {
    /// Open a store backed by the given file.
    ///
    /// A missing file yields an empty store; an unparseable one is an error
    /// so that a corrupt snapshot is never silently discarded.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, BridgeError> {
        let path = path.into();

        let entries = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(err) => return Err(err.into()),
        };

        Ok(Self {
            path,
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Merge a value into the entry for an id, creating it if absent.
    pub fn set(&self, id: &str, value: Value) {
        let mut entries = self.entries.write().unwrap();
        match entries.get_mut(id) {
            Some(existing) => merge_json(existing, &value),
            None => {
                entries.insert(id.to_string(), value);
            }
        }
        self.dirty.store(true, Ordering::Release);
    }

    pub fn get(&self, id: &str) -> Option<Value> {
        self.entries.read().unwrap().get(id).cloned()
    }

    /// Deserialize the entry for an id, skipping it on shape mismatch.
    pub fn get_as<T: DeserializeOwned>(&self, id: &str) -> Option<T> {
        let value = self.get(id)?;
        serde_json::from_value(value).ok()
    }

    pub fn exists(&self, id: &str) -> bool {
        self.entries.read().unwrap().contains_key(id)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.read().unwrap().keys().cloned().collect()
    }

    pub fn get_all(&self) -> Map<String, Value> {
        self.entries.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }

    /// Remove an entry; returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        let removed = self.entries.write().unwrap().remove(id).is_some();
        if removed {
            self.dirty.store(true, Ordering::Release);
        }
        removed
    }

    /// Drop all entries and write the empty snapshot.
    pub fn reset(&self) -> Result<(), PersistError> {
        self.entries.write().unwrap().clear();
        self.dirty.store(true, Ordering::Release);
        self.persist()
    }

    /// Write the snapshot to disk if anything changed since the last write.
    pub fn persist(&self) -> Result<(), PersistError> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let result = self.write_snapshot();
        if result.is_err() {
            self.dirty.store(true, Ordering::Release);
        }
        result
    }

    fn write_snapshot(&self) -> Result<(), PersistError> {
        let persist_err = |message: String| PersistError {
            path: self.path.display().to_string(),
            message,
        };

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|err| persist_err(err.to_string()))?;
            }
        }

        let snapshot = self.entries.read().unwrap().clone();
        let content = serde_json::to_string_pretty(&Value::Object(snapshot))
            .map_err(|err| persist_err(err.to_string()))?;

        std::fs::write(&self.path, content).map_err(|err| persist_err(err.to_string()))?;
        debug!("Persisted {}", self.path.display());
        Ok(())
    }
}

/// Merge `incoming` into `target`.
///
/// Objects merge key by key, arrays take the union preserving order of
/// first appearance, anything else is overwritten.
pub fn merge_json(target: &mut Value, incoming: &Value) {
    match (target, incoming) {
        (Value::Object(target), Value::Object(incoming)) => {
            for (key, value) in incoming {
                match target.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(incoming)) => {
            for item in incoming {
                if !target.contains(item) {
                    target.push(item.clone());
                }
            }
        }
        (target, incoming) => *target = incoming.clone(),
    }
}

/// Periodically flush a store in the background.
pub fn spawn_persist_task(
    store: std::sync::Arc<JsonStore>,
    every: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            if let Err(err) = store.persist() {
                warn!("Background snapshot failed: {}", err);
            }
        }
    })
}
