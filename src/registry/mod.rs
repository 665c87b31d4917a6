//! Per-device mapping registry.
//!
//! The registry loads a device's mapping documents the first time the device is
//! requested and keeps them for the life of the process (or until
//! [`MappingRegistry::reset`]). A loaded device is an immutable
//! [`DeviceMappings`] snapshot behind an `Arc`: it is published only after the
//! whole load succeeds, so readers never observe a partially loaded device and
//! resolution never holds a lock.
//!
//! Loads are serialised by a single mutex. A failed load publishes nothing and
//! the next request for the device retries it.

pub mod loader;
pub mod selector;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::cache::SharedCache;
use crate::error::Result;
use crate::mapping::MappingTable;
use loader::LoadContext;
use selector::select_shot;

/// Attributes and mappings of one shot partition of a quantity group.
///
/// Both stores of a group are always partitioned identically, so they are
/// kept together.
#[derive(Debug)]
pub struct Partition {
    /// Merged attribute document.
    pub attributes: Value,
    /// Mapping key to strategy.
    pub mappings: MappingTable,
}

/// All shot partitions of one quantity group.
#[derive(Debug, Default)]
pub struct GroupMappings {
    partitions: BTreeMap<i64, Arc<Partition>>,
}

impl GroupMappings {
    /// Partition keys in ascending order; `-1` is the shot-independent partition.
    pub fn shots(&self) -> impl Iterator<Item = i64> + '_ {
        self.partitions.keys().copied()
    }

    /// The partition applying to `shot`, if any.
    pub fn select(&self, shot: Option<i64>) -> Option<Selection> {
        let selected = select_shot(&self.partitions, shot)?;
        let partition = self.partitions.get(&selected)?.clone();
        Some(Selection {
            shot: selected,
            partition,
        })
    }
}

/// Everything loaded for one device.
#[derive(Debug)]
pub struct DeviceMappings {
    device: String,
    groups: HashMap<String, GroupMappings>,
}

impl DeviceMappings {
    /// Lower-case device name.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// A quantity group by name.
    pub fn group(&self, ids: &str) -> Option<&GroupMappings> {
        self.groups.get(ids)
    }

    /// Names of the loaded quantity groups, sorted.
    pub fn group_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.groups.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// The partition chosen for a request.
#[derive(Debug, Clone)]
pub struct Selection {
    shot: i64,
    partition: Arc<Partition>,
}

impl Selection {
    /// Selected partition key.
    pub fn shot(&self) -> i64 {
        self.shot
    }

    /// Attribute document of the partition.
    pub fn attributes(&self) -> &Value {
        &self.partition.attributes
    }

    /// Mapping table of the partition.
    pub fn mappings(&self) -> &MappingTable {
        &self.partition.mappings
    }
}

/// Lazily loaded, process-wide store of device mappings.
#[derive(Debug)]
pub struct MappingRegistry {
    mapping_dir: RwLock<PathBuf>,
    dd_version: String,
    cache: Option<SharedCache>,
    devices: RwLock<HashMap<String, Arc<DeviceMappings>>>,
    load_lock: Mutex<()>,
}

impl MappingRegistry {
    /// Create a registry reading from `mapping_dir`.
    ///
    /// `cache` is handed to every plugin mapping built by this registry.
    pub fn new(
        mapping_dir: impl Into<PathBuf>,
        dd_version: impl Into<String>,
        cache: Option<SharedCache>,
    ) -> Self {
        Self {
            mapping_dir: RwLock::new(mapping_dir.into()),
            dd_version: dd_version.into(),
            cache,
            devices: RwLock::new(HashMap::new()),
            load_lock: Mutex::new(()),
        }
    }

    /// Root of the mapping tree.
    pub fn mapping_dir(&self) -> PathBuf {
        self.mapping_dir.read().clone()
    }

    /// Data-dictionary version used to read manifests.
    pub fn dd_version(&self) -> &str {
        &self.dd_version
    }

    /// Point the registry at another mapping tree, forgetting every loaded device.
    pub fn set_mapping_dir(&self, mapping_dir: impl Into<PathBuf>) {
        let _guard = self.load_lock.lock();
        *self.mapping_dir.write() = mapping_dir.into();
        self.devices.write().clear();
        info!(dir = %self.mapping_dir.read().display(), "Mapping directory changed");
    }

    /// Forget every loaded device.
    pub fn reset(&self) {
        let _guard = self.load_lock.lock();
        self.devices.write().clear();
        debug!("Registry reset");
    }

    /// Whether `device` has been loaded.
    pub fn is_loaded(&self, device: &str) -> bool {
        self.devices.read().contains_key(&device.to_lowercase())
    }

    /// Names of the loaded devices, sorted.
    pub fn loaded_devices(&self) -> Vec<String> {
        let mut names: Vec<String> = self.devices.read().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Load `device` if it has not been loaded yet, and return its mappings.
    ///
    /// Device names are case-insensitive.
    #[instrument(skip(self))]
    pub fn load_device(&self, device: &str) -> Result<Arc<DeviceMappings>> {
        let device = device.to_lowercase();
        if let Some(loaded) = self.devices.read().get(&device) {
            return Ok(loaded.clone());
        }

        let _guard = self.load_lock.lock();
        if let Some(loaded) = self.devices.read().get(&device) {
            return Ok(loaded.clone());
        }

        let root = self.mapping_dir();
        let ctx = LoadContext {
            root: &root,
            device: &device,
            dd_version: &self.dd_version,
            cache: self.cache.clone(),
        };
        let loaded = Arc::new(loader::load_device(&ctx)?);
        self.devices.write().insert(device, loaded.clone());
        Ok(loaded)
    }

    /// The attributes and mappings applying to a request.
    ///
    /// `Ok(None)` means the device does not configure `ids`, or no partition
    /// applies to `shot`. Load failures are errors.
    pub fn read_mappings(
        &self,
        device: &str,
        ids: &str,
        shot: Option<i64>,
    ) -> Result<Option<Selection>> {
        let loaded = self.load_device(device)?;
        let Some(group) = loaded.group(ids) else {
            debug!(device = %device, ids = %ids, "Quantity group not configured");
            return Ok(None);
        };
        let selection = group.select(shot);
        match &selection {
            Some(selected) => debug!(
                device = %device,
                ids = %ids,
                ?shot,
                partition = selected.shot(),
                "Selected partition"
            ),
            None => debug!(
                device = %device,
                ids = %ids,
                ?shot,
                partitions = ?group.shots().collect::<Vec<_>>(),
                "No partition applies"
            ),
        }
        Ok(selection)
    }
}

/// Root-relative directory of a device.
pub fn device_dir(root: &Path, device: &str) -> PathBuf {
    root.join(device.to_lowercase())
}
