//! Loading a device's mapping documents from disk.
//!
//! A device's documents live under `<root>/<device>/`:
//!
//! ```text
//! <root>/<device>/mappings.cfg.json          manifest: {"<dd_version>": ["<ids>", ...]}
//! <root>/<device>/globals.json               device-wide attributes (required)
//! <root>/<device>/<ids>/globals.json         group attributes
//! <root>/<device>/<ids>/mappings.json        group mappings
//! <root>/<device>/<ids>/<shot>/globals.json  shot attributes
//! <root>/<device>/<ids>/<shot>/mappings.json shot mappings
//! ```
//!
//! A group with no shot sub-directories is shot-independent and its own
//! `globals.json` and `mappings.json` are required. A group with shot
//! sub-directories has one partition per directory, and the group-level
//! `globals.json` becomes an optional layer under each shot's attributes.
//!
//! Every failure to open or parse a document is a
//! [`TokamapError::Config`] naming the file.

use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::selector::SHOT_INDEPENDENT;
use super::{DeviceMappings, GroupMappings, Partition};
use crate::cache::SharedCache;
use crate::error::{Result, TokamapError};
use crate::mapping::{
    CustomMapping, DimensionMapping, ExprMapping, MapType, Mapping, MappingTable, PluginMapping,
    ValueMapping,
};
use crate::template;

/// Manifest file name.
pub const MANIFEST_FILE: &str = "mappings.cfg.json";
/// Attribute document file name.
pub const GLOBALS_FILE: &str = "globals.json";
/// Mapping document file name.
pub const MAPPINGS_FILE: &str = "mappings.json";

/// Key of the plugin defaults section in an attribute document.
const PLUGIN_CONFIG: &str = "PLUGIN_CONFIG";

/// Settings shared by every document of one device load.
#[derive(Debug, Clone)]
pub struct LoadContext<'a> {
    /// Root of the mapping tree.
    pub root: &'a Path,
    /// Lower-case device name.
    pub device: &'a str,
    /// Data-dictionary version selecting the manifest entry.
    pub dd_version: &'a str,
    /// Cache handed to plugin mappings.
    pub cache: Option<SharedCache>,
}

impl LoadContext<'_> {
    fn device_dir(&self) -> PathBuf {
        super::device_dir(self.root, self.device)
    }

    fn group_dir(&self, ids: &str) -> PathBuf {
        self.device_dir().join(ids)
    }

    fn partition_file(&self, ids: &str, shot: i64, file_name: &str) -> PathBuf {
        if shot == SHOT_INDEPENDENT {
            self.group_dir(ids).join(file_name)
        } else {
            self.group_dir(ids).join(shot.to_string()).join(file_name)
        }
    }
}

/// Load every quantity group the manifest lists for the context's version.
///
/// # Errors
///
/// Fails on the first document that cannot be read or parsed, or if the
/// manifest has no list for the requested data-dictionary version.
pub fn load_device(ctx: &LoadContext<'_>) -> Result<DeviceMappings> {
    let groups_to_load = load_manifest(ctx)?;
    let toplevel = read_json(&ctx.device_dir().join(GLOBALS_FILE))?;

    let mut groups = HashMap::with_capacity(groups_to_load.len());
    for ids in groups_to_load {
        let attributes = load_attributes(ctx, &ids, &toplevel)?;
        let mut mappings = load_mappings(ctx, &ids, &attributes)?;

        let partitions = attributes
            .into_iter()
            .filter_map(|(shot, attributes)| {
                let mappings = mappings.remove(&shot)?;
                Some((shot, Arc::new(Partition { attributes, mappings })))
            })
            .collect();
        groups.insert(ids, GroupMappings { partitions });
    }

    info!(
        device = %ctx.device,
        dd_version = %ctx.dd_version,
        groups = groups.len(),
        "Loaded device mappings"
    );
    Ok(DeviceMappings {
        device: ctx.device.to_string(),
        groups,
    })
}

/// Read the manifest and return the groups listed for the data-dictionary version.
pub fn load_manifest(ctx: &LoadContext<'_>) -> Result<Vec<String>> {
    let path = ctx.device_dir().join(MANIFEST_FILE);
    let manifest = read_json(&path)?;

    let listed = manifest
        .get(ctx.dd_version)
        .ok_or_else(|| TokamapError::Manifest {
            path: path.clone(),
            version: ctx.dd_version.to_string(),
        })?;
    let groups: Vec<String> = serde_json::from_value(listed.clone()).map_err(|e| {
        let message = format!("entry '{}' is not a list of names: {e}", ctx.dd_version);
        TokamapError::config(&path, message)
    })?;

    debug!(path = %path.display(), ?groups, "Read manifest");
    Ok(groups)
}

/// Shot partitions present for a group, in ascending order.
///
/// Sub-directories whose names are not integers are ignored.
pub fn find_shot_dirs(group_dir: &Path) -> Result<Vec<i64>> {
    let entries =
        fs::read_dir(group_dir).map_err(|e| TokamapError::config(group_dir, e.to_string()))?;

    let mut shots = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| TokamapError::config(group_dir, e.to_string()))?;
        if !entry.path().is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        match name.parse::<i64>() {
            Ok(shot) if shot >= 0 => shots.push(shot),
            _ => warn!(
                dir = %entry.path().display(),
                "Ignoring directory that is not a shot number"
            ),
        }
    }
    shots.sort_unstable();
    Ok(shots)
}

/// Attribute documents of a group, one per shot partition.
///
/// Keys are layered shallowly: shot keys win over group keys, which win over
/// device top-level keys.
pub fn load_attributes(
    ctx: &LoadContext<'_>,
    ids: &str,
    toplevel: &Value,
) -> Result<BTreeMap<i64, Value>> {
    let shots = find_shot_dirs(&ctx.group_dir(ids))?;
    let mut partitions = BTreeMap::new();

    if shots.is_empty() {
        let group = read_json(&ctx.partition_file(ids, SHOT_INDEPENDENT, GLOBALS_FILE))?;
        partitions.insert(SHOT_INDEPENDENT, merge_attributes(&[toplevel, &group]));
        return Ok(partitions);
    }

    let group_file = ctx.group_dir(ids).join(GLOBALS_FILE);
    let group = if group_file.is_file() {
        read_json(&group_file)?
    } else {
        Value::Object(Map::new())
    };

    for shot in shots {
        let shot_globals = read_json(&ctx.partition_file(ids, shot, GLOBALS_FILE))?;
        partitions.insert(shot, merge_attributes(&[toplevel, &group, &shot_globals]));
    }
    debug!(ids = %ids, partitions = partitions.len(), "Loaded attributes");
    Ok(partitions)
}

/// Shallow merge: later documents override earlier ones key by key.
pub fn merge_attributes(layers: &[&Value]) -> Value {
    let mut merged = Map::new();
    for layer in layers {
        if let Value::Object(map) = layer {
            for (key, value) in map {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(merged)
}

/// Mapping tables of a group, one per attribute partition.
pub fn load_mappings(
    ctx: &LoadContext<'_>,
    ids: &str,
    attributes: &BTreeMap<i64, Value>,
) -> Result<BTreeMap<i64, MappingTable>> {
    let mut partitions = BTreeMap::new();
    for (&shot, shot_attributes) in attributes {
        let path = ctx.partition_file(ids, shot, MAPPINGS_FILE);
        let document = read_json(&path)?;
        let Value::Object(entries) = document else {
            return Err(TokamapError::config(&path, "mapping document must be a JSON object"));
        };

        let mut table = MappingTable::with_capacity(entries.len());
        for (key, definition) in &entries {
            if let Some(mapping) = build_mapping(ctx, &path, key, definition, shot_attributes)? {
                table.insert(key.clone(), mapping);
            }
        }
        debug!(ids = %ids, shot, entries = table.len(), "Loaded mappings");
        partitions.insert(shot, table);
    }
    Ok(partitions)
}

/// Build one mapping strategy from its document entry.
///
/// Entries with an unknown `MAP_TYPE` are skipped with a warning.
pub fn build_mapping(
    ctx: &LoadContext<'_>,
    path: &Path,
    key: &str,
    definition: &Value,
    attributes: &Value,
) -> Result<Option<Mapping>> {
    let field = |name: &'static str| {
        definition.get(name).ok_or_else(|| TokamapError::MissingField {
            path: path.to_path_buf(),
            key: key.to_string(),
            field: name,
        })
    };
    let string_field = |name: &'static str| -> Result<String> {
        field(name)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| TokamapError::MissingField {
                path: path.to_path_buf(),
                key: key.to_string(),
                field: name,
            })
    };

    let tag = string_field("MAP_TYPE")?;
    let Some(map_type) = MapType::parse(&tag) else {
        warn!(
            path = %path.display(),
            key = %key,
            map_type = %tag,
            "Skipping mapping with unknown MAP_TYPE"
        );
        return Ok(None);
    };

    let mapping = match map_type {
        MapType::Value => Mapping::Value(ValueMapping::new(field("VALUE")?.clone())),
        MapType::Plugin => {
            let plugin = string_field("PLUGIN")?;
            let args = match definition.get("ARGS") {
                None | Some(Value::Null) => Map::new(),
                Some(Value::Object(args)) => args.clone(),
                Some(_) => {
                    return Err(TokamapError::MissingField {
                        path: path.to_path_buf(),
                        key: key.to_string(),
                        field: "ARGS",
                    })
                }
            };
            let mut mapping = PluginMapping::new(&plugin, args);
            mapping = apply_plugin_config(mapping, attributes);

            if let Some(function) = definition.get("FUNCTION").and_then(Value::as_str) {
                mapping = mapping.with_function(function);
            }
            if let Some(slice) = definition.get("SLICE").and_then(Value::as_str) {
                mapping = mapping.with_slice(slice);
            }
            if let Some(offset) = float_field(definition, "OFFSET", attributes, key) {
                mapping = mapping.with_offset(offset);
            }
            if let Some(scale) = float_field(definition, "SCALE", attributes, key) {
                mapping = mapping.with_scale(scale);
            }
            if let Some(cache) = &ctx.cache {
                mapping = mapping.with_cache(cache.clone());
            }
            Mapping::Plugin(mapping)
        }
        MapType::Dimension => Mapping::Dimension(DimensionMapping::new(string_field("DI_PROBE")?)),
        MapType::Expr => {
            let expression = string_field("EXPR")?;
            let parameters = match definition.get("PARAMETERS") {
                None | Some(Value::Null) => BTreeMap::new(),
                Some(Value::Object(params)) => params
                    .iter()
                    .map(|(name, value)| {
                        let text = match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (name.clone(), text)
                    })
                    .collect(),
                Some(_) => {
                    return Err(TokamapError::MissingField {
                        path: path.to_path_buf(),
                        key: key.to_string(),
                        field: "PARAMETERS",
                    })
                }
            };
            let expr = ExprMapping::new(expression, parameters)
                .map_err(|e| TokamapError::config(path, format!("mapping '{key}': {e}")))?;
            Mapping::Expr(expr)
        }
        MapType::Custom => Mapping::Custom(CustomMapping::new(string_field("CUSTO_TYPE")?)),
    };
    Ok(Some(mapping))
}

/// Fill in `ARGS` and `FUNCTION` defaults from `PLUGIN_CONFIG.<plugin>`.
///
/// Defaults never override arguments given by the mapping itself. A
/// `FUNCTION` given by the mapping is applied afterwards and wins.
fn apply_plugin_config(mut mapping: PluginMapping, attributes: &Value) -> PluginMapping {
    let Some(Value::Object(configs)) = attributes.get(PLUGIN_CONFIG) else {
        return mapping;
    };
    let Some(config) = configs
        .iter()
        .find(|(name, _)| name.to_uppercase() == mapping.plugin())
        .map(|(_, config)| config)
    else {
        return mapping;
    };

    if let Some(Value::Object(defaults)) = config.get("ARGS") {
        mapping = mapping.with_default_args(defaults);
    }
    if let Some(function) = config.get("FUNCTION").and_then(Value::as_str) {
        mapping = mapping.with_function(function);
    }
    mapping
}

/// Read `OFFSET` / `SCALE`: a number, or a template rendered against the
/// partition's attributes and parsed as a float. Unparseable values are
/// dropped with a warning.
fn float_field(definition: &Value, name: &str, attributes: &Value, key: &str) -> Option<f64> {
    match definition.get(name)? {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => {
            let parsed = template::render(text, attributes)
                .ok()
                .and_then(|rendered| rendered.trim().parse::<f64>().ok());
            if parsed.is_none() {
                warn!(
                    key = %key,
                    field = %name,
                    value = %text,
                    "Cannot convert field to a number, ignoring it"
                );
            }
            parsed
        }
        _ => None,
    }
}

/// Read and parse one JSON document.
pub fn read_json(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path).map_err(|e| TokamapError::config(path, e.to_string()))?;
    serde_json::from_str(&text).map_err(|e| TokamapError::config(path, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(path: &Path, value: &Value) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
    }

    fn context(root: &Path) -> LoadContext<'_> {
        LoadContext {
            root,
            device: "mastu",
            dd_version: "3.39.0",
            cache: None,
        }
    }

    #[test]
    fn shallow_merge_prefers_later_layers() {
        let merged = merge_attributes(&[
            &json!({ "a": 1, "b": { "x": 1 } }),
            &json!({ "b": { "y": 2 }, "c": 3 }),
        ]);
        assert_eq!(merged, json!({ "a": 1, "b": { "y": 2 }, "c": 3 }));
    }

    #[test]
    fn shot_directories_are_sorted_and_filtered() {
        let dir = TempDir::new().unwrap();
        for name in ["200", "10", "notes", "-3"] {
            fs::create_dir_all(dir.path().join(name)).unwrap();
        }
        fs::write(dir.path().join("55"), "file, not a directory").unwrap();
        assert_eq!(find_shot_dirs(dir.path()).unwrap(), vec![10, 200]);
    }

    #[test]
    fn missing_manifest_version_is_reported() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("mastu").join(MANIFEST_FILE), &json!({ "4.0.0": ["pf_active"] }));
        let err = load_manifest(&context(dir.path())).unwrap_err();
        assert!(matches!(err, TokamapError::Manifest { ref version, .. } if version == "3.39.0"));
    }

    #[test]
    fn plugin_config_supplies_defaults_without_overriding() {
        let dir = TempDir::new().unwrap();
        let attributes = json!({
            "PLUGIN_CONFIG": {
                "uda": { "ARGS": { "host": "uda2", "signal": "default" }, "FUNCTION": "get" }
            }
        });
        let definition = json!({
            "MAP_TYPE": "PLUGIN",
            "PLUGIN": "uda",
            "ARGS": { "signal": "AMB_FL/CC01" },
            "SCALE": "{{ gain }}",
            "OFFSET": 0.5
        });
        let ctx = context(dir.path());
        let path = dir.path().join(MAPPINGS_FILE);
        let built = build_mapping(&ctx, &path, "flux", &definition, &attributes).unwrap();
        let Some(Mapping::Plugin(mapping)) = built else {
            panic!("expected a plugin mapping");
        };

        assert_eq!(mapping.plugin(), "UDA");
        assert_eq!(mapping.args()["signal"], json!("AMB_FL/CC01"));
        assert_eq!(mapping.args()["host"], json!("uda2"));
        assert_eq!(mapping.function(), Some("get"));
        assert_eq!(mapping.offset(), Some(0.5));
        // `gain` is not an attribute, so the scale is dropped.
        assert_eq!(mapping.scale(), None);
    }

    #[test]
    fn mapping_function_wins_over_plugin_config() {
        let dir = TempDir::new().unwrap();
        let attributes = json!({
            "gain": 2,
            "PLUGIN_CONFIG": { "UDA": { "FUNCTION": "get" } }
        });
        let definition = json!({
            "MAP_TYPE": "PLUGIN",
            "PLUGIN": "UDA",
            "FUNCTION": "getdata",
            "SCALE": "{{ gain }}"
        });
        let ctx = context(dir.path());
        let path = dir.path().join(MAPPINGS_FILE);
        let built = build_mapping(&ctx, &path, "k", &definition, &attributes).unwrap();
        let Some(Mapping::Plugin(mapping)) = built else {
            panic!("expected a plugin mapping");
        };
        assert_eq!(mapping.function(), Some("getdata"));
        assert_eq!(mapping.scale(), Some(2.0));
    }

    #[test]
    fn unknown_map_type_is_skipped() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());
        let path = dir.path().join(MAPPINGS_FILE);
        let definition = json!({ "MAP_TYPE": "SLICE", "VALUE": 1 });
        assert!(build_mapping(&ctx, &path, "k", &definition, &json!({})).unwrap().is_none());
    }

    #[test]
    fn missing_required_field_names_the_file() {
        let dir = TempDir::new().unwrap();
        let ctx = context(dir.path());
        let path = dir.path().join(MAPPINGS_FILE);
        let definition = json!({ "MAP_TYPE": "DIMENSION" });
        let err = build_mapping(&ctx, &path, "coil", &definition, &json!({})).unwrap_err();
        assert!(matches!(err, TokamapError::MissingField { field: "DI_PROBE", .. }));
        assert!(err.to_string().contains(MAPPINGS_FILE));
    }

    #[test]
    fn unreadable_document_names_the_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        fs::write(&path, "{ not json").unwrap();
        let err = read_json(&path).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("broken.json"));
    }
}
