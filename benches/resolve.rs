//! Criterion benchmarks for the resolution hot paths.
//!
//! Key metrics:
//! - Path generalisation and key matching
//! - End-to-end resolution of literal, expression and cached plugin mappings
//! - Strided subsetting of large buffers
//!
//! Run with: cargo bench --bench resolve

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokamap::path::{generate_map_path, RequestPath};
use tokamap::transform::{apply_subsetting, parse_slice};
use tokamap::{Engine, EngineConfig, PluginCall, Request, TypedBuffer};

fn write(path: &Path, value: &serde_json::Value) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, value.to_string()).unwrap();
}

fn mapping_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let device = dir.path().join("bench");
    write(&device.join("mappings.cfg.json"), &json!({ "3.39.0": ["magnetics"] }));
    write(&device.join("globals.json"), &json!({ "prefix": "AMB" }));
    write(&device.join("magnetics/globals.json"), &json!({ "gain": 2.0 }));
    write(
        &device.join("magnetics/mappings.json"),
        &json!({
            "flux_loop[#]/name": { "MAP_TYPE": "VALUE", "VALUE": "{{ prefix }}_{{ indices.0 }}" },
            "flux_loop[#]/flux": {
                "MAP_TYPE": "PLUGIN",
                "PLUGIN": "RAMP",
                "ARGS": { "signal": "/{{ prefix }}/FL{{ indices.0 }}" }
            },
            "ip": { "MAP_TYPE": "EXPR", "EXPR": "x * g", "PARAMETERS": { "x": "[1, 2, 3, 4]", "g": "{{ gain }}" } }
        }),
    );
    dir
}

fn ramp(_call: &PluginCall<'_>) -> anyhow::Result<TypedBuffer> {
    Ok(TypedBuffer::from_vec((0..10_000).map(f64::from).collect::<Vec<_>>()))
}

/// Benchmark matching request paths against a mapping table.
fn path_matching(c: &mut Criterion) {
    let table: HashMap<String, ()> = (0..500)
        .map(|i| (format!("channel_{i}[#]/signal[#]/data"), ()))
        .chain([("flux_loop[#]/flux".to_string(), ())])
        .collect();

    let mut group = c.benchmark_group("path_matching");
    for path in ["magnetics/flux_loop[3]/flux", "magnetics/flux_loop[3]/flux/data", "magnetics/missing[1]/x"] {
        group.bench_with_input(BenchmarkId::from_parameter(path), path, |b, path| {
            b.iter(|| {
                let request = RequestPath::parse(black_box(path)).unwrap();
                generate_map_path(&request, &table)
            });
        });
    }
    group.finish();
}

/// Benchmark full resolution through the engine.
fn engine_resolution(c: &mut Criterion) {
    let dir = mapping_tree();
    let engine = Engine::new(EngineConfig::new(dir.path()).with_cache(100, 10)).unwrap();
    engine.register_data_source("ramp", Arc::new(ramp));

    let requests = [
        ("value", Request::new("bench", "magnetics/flux_loop[3]/name")),
        ("expr", Request::new("bench", "magnetics/ip")),
        ("plugin_cached", Request::new("bench", "magnetics/flux_loop[3]/flux/data")),
    ];

    let mut group = c.benchmark_group("resolve");
    for (name, request) in &requests {
        group.bench_with_input(BenchmarkId::from_parameter(name), request, |b, request| {
            b.iter(|| engine.resolve(black_box(request)).unwrap());
        });
    }
    group.finish();
}

/// Benchmark strided subsetting with scale and offset.
fn subsetting(c: &mut Criterion) {
    let mut group = c.benchmark_group("subset");
    for (rows, cols) in [(100, 100), (1000, 1000)] {
        let values: Vec<f64> = (0..rows * cols).map(|v| v as f64).collect();
        let buffer = TypedBuffer::with_shape(&values, vec![rows, cols]).unwrap();
        let dims = parse_slice("[::2, 1:]", buffer.shape()).unwrap();

        group.throughput(Throughput::Elements((rows * cols) as u64));
        group.bench_with_input(BenchmarkId::new("stride_2", rows * cols), &buffer, |b, buffer| {
            b.iter(|| {
                let mut copy = buffer.clone();
                apply_subsetting(&mut copy, &dims, 2.0, 1.0).unwrap();
                copy
            });
        });
    }
    group.finish();
}

criterion_group!(benches, path_matching, engine_resolution, subsetting);
criterion_main!(benches);
