//! Shared fixtures for integration tests: an on-disk mapping tree and a
//! counting data source.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokamap::{DataSource, PluginCall, TypedBuffer};

pub fn write_json(path: &Path, value: &Value) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, serde_json::to_string_pretty(value).unwrap()).unwrap();
}

/// Mapping tree for device `mastu` with a shot-independent `magnetics` group
/// and a `pf_active` group partitioned at shots 10 and 20.
pub fn mapping_tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    let device = dir.path().join("mastu");

    write_json(
        &device.join("mappings.cfg.json"),
        &json!({ "3.39.0": ["magnetics", "pf_active"], "4.0.0": ["magnetics"] }),
    );
    write_json(&device.join("globals.json"), &json!({ "machine": "MASTU", "source": "device" }));

    let magnetics = device.join("magnetics");
    write_json(
        &magnetics.join("globals.json"),
        &json!({
            "source": "group",
            "prefix": "AMB",
            "gain": "2.5",
            "PLUGIN_CONFIG": {
                "uda": { "ARGS": { "host": "uda2.mast.l", "signal": "overridden" }, "FUNCTION": "get" }
            }
        }),
    );
    write_json(
        &magnetics.join("mappings.json"),
        &json!({
            "ids_properties/homogeneous_time": { "MAP_TYPE": "VALUE", "VALUE": 1 },
            "ids_properties/comment": { "MAP_TYPE": "VALUE", "VALUE": "{{ machine }} from {{ source }}" },
            "flux_loop[#]/name": { "MAP_TYPE": "VALUE", "VALUE": "{{ prefix }}_FL{{ indices.0 }}" },
            "flux_loop[#]/flux": {
                "MAP_TYPE": "PLUGIN",
                "PLUGIN": "uda",
                "ARGS": { "signal": "/{{ prefix }}/FL/P{{ indices.0 }}", "shot": "{{ shot }}" },
                "SCALE": "{{ gain }}"
            },
            "flux_loop[#]/voltage": {
                "MAP_TYPE": "PLUGIN",
                "PLUGIN": "UDA",
                "ARGS": { "signal": "/{{ prefix }}/FL/V{{ indices.0 }}" },
                "SLICE": "[0::2]",
                "OFFSET": 1
            },
            "flux_loop[#]/current": {
                "MAP_TYPE": "PLUGIN",
                "PLUGIN": "UDA",
                "ARGS": { "signal": "/{{ prefix }}/FL/I{{ indices.0 }}" }
            },
            "flux_loop[#]/position[2]/r": { "MAP_TYPE": "VALUE", "VALUE": 0.25 },
            "b_field_pol_probe[0]/position/r": { "MAP_TYPE": "VALUE", "VALUE": 1.5 },
            "b_field_pol_probe[#]/position/z": { "MAP_TYPE": "VALUE", "VALUE": -0.5 },
            "b_field_pol_probe[0]/position/z": { "MAP_TYPE": "VALUE", "VALUE": 99.0 },
            "b_field_pol_probe[#]/field": { "MAP_TYPE": "DIMENSION", "DI_PROBE": "raw_field" },
            "raw_field/data": { "MAP_TYPE": "VALUE", "VALUE": [1, 2, 3] },
            "raw_field/time": { "MAP_TYPE": "VALUE", "VALUE": [0.5, 1.0, 1.5] },
            "ip": {
                "MAP_TYPE": "EXPR",
                "EXPR": "a * b + c",
                "PARAMETERS": { "a": "ids_properties/homogeneous_time", "b": "{{ gain }}", "c": "raw_field/data" }
            },
            "method[#]/name": { "MAP_TYPE": "CUSTOM", "CUSTO_TYPE": "MASTU_CHANNEL" },
            "code/user": { "MAP_TYPE": "VALUE", "VALUE": "{{ user }}" },
            "code/run": { "MAP_TYPE": "VALUE", "VALUE": "{{ run }}" },
            "rogowski_coil[#]/current": { "MAP_TYPE": "PLUGIN", "PLUGIN": "GEOMETRY", "ARGS": {} },
            "streamed": { "MAP_TYPE": "STREAM", "SOURCE": "kafka" }
        }),
    );

    let pf_active = device.join("pf_active");
    for (shot, turns) in [(10, 24), (20, 36)] {
        let partition = pf_active.join(shot.to_string());
        write_json(&partition.join("globals.json"), &json!({ "turns": turns, "source": "shot" }));
        write_json(
            &partition.join("mappings.json"),
            &json!({
                "coil[#]/element[#]/turns_with_sign": { "MAP_TYPE": "VALUE", "VALUE": "{{ turns }}" },
                "coil[#]/identifier": { "MAP_TYPE": "VALUE", "VALUE": "{{ source }}" }
            }),
        );
    }
    dir
}

/// Data source returning `[1, 2, 3, 4]` as float64 and recording each call.
#[derive(Default)]
pub struct CountingSource {
    calls: AtomicUsize,
    last_args: Mutex<Option<(Option<String>, Value)>>,
}

impl CountingSource {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Function name and rendered arguments of the latest call.
    pub fn last_call(&self) -> Option<(Option<String>, Value)> {
        self.last_args.lock().unwrap().clone()
    }
}

impl DataSource for CountingSource {
    fn get(&self, call: &PluginCall<'_>) -> anyhow::Result<TypedBuffer> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_args.lock().unwrap() = Some((
            call.function.map(str::to_string),
            Value::Object(call.args.clone()),
        ));
        Ok(TypedBuffer::from_vec(vec![1.0f64, 2.0, 3.0, 4.0]))
    }
}

pub fn counting_source() -> Arc<CountingSource> {
    Arc::new(CountingSource::default())
}

/// Data source returning `[shot, sign]`: the `shot` attribute (`-1` when
/// absent) and `1.0` when the `machine` attribute is `MASTU`, else `-1.0`.
#[derive(Default)]
pub struct ShotSource {
    calls: AtomicUsize,
}

impl ShotSource {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DataSource for ShotSource {
    fn get(&self, call: &PluginCall<'_>) -> anyhow::Result<TypedBuffer> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let shot = call.attributes.get("shot").and_then(Value::as_i64).unwrap_or(-1);
        let machine = call.attributes.get("machine").and_then(Value::as_str);
        let sign = if machine == Some("MASTU") { 1.0 } else { -1.0 };
        Ok(TypedBuffer::from_vec(vec![shot as f64, sign]))
    }
}

/// Add device `name` whose `flux_loop[#]/current` renders the same plugin
/// arguments as the one in [`mapping_tree`].
pub fn add_plain_device(root: &Path, name: &str, machine: &str) {
    let device = root.join(name);
    write_json(&device.join("mappings.cfg.json"), &json!({ "3.39.0": ["magnetics"] }));
    write_json(&device.join("globals.json"), &json!({ "machine": machine }));
    write_json(
        &device.join("magnetics/globals.json"),
        &json!({ "PLUGIN_CONFIG": { "uda": { "ARGS": { "host": "uda2.mast.l" }, "FUNCTION": "get" } } }),
    );
    write_json(
        &device.join("magnetics/mappings.json"),
        &json!({
            "flux_loop[#]/current": {
                "MAP_TYPE": "PLUGIN",
                "PLUGIN": "UDA",
                "ARGS": { "signal": "/AMB/FL/I{{ indices.0 }}" }
            }
        }),
    );
}
