use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use modsync::config::{Config, DirectoryMapping, ExcludeScope, PrefixMatch};
use modsync::engine::Reconciler;
use modsync::mapping::remote_path;
use modsync::policy::should_sync;
use modsync::storage::MetadataStore;
use std::fs;
use std::hint::black_box;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::tempdir;

fn mappings(count: usize) -> Vec<DirectoryMapping> {
    (0..count)
        .map(|i| {
            DirectoryMapping::new(format!("/data/root{i}"), format!("r{i}"))
                .with_excludes(["*.tmp", "*.log", "cache*", ".DS_Store", "node_modules"])
        })
        .collect()
}

fn benchmark_policy_and_mapping(c: &mut Criterion) {
    let mut group = c.benchmark_group("policy");

    for count in [1, 10, 50] {
        let mappings = mappings(count);
        let path = PathBuf::from(format!("/data/root{}/src/deep/module/file.rs", count - 1));

        group.bench_with_input(BenchmarkId::new("should_sync", count), &path, |b, path| {
            b.iter(|| {
                should_sync(
                    black_box(path),
                    &mappings,
                    ExcludeScope::Mapping,
                    PrefixMatch::Component,
                )
            });
        });

        group.bench_with_input(BenchmarkId::new("remote_path", count), &path, |b, path| {
            b.iter(|| {
                remote_path(
                    black_box(path),
                    Path::new("/mnt/remote"),
                    &mappings,
                    PrefixMatch::Component,
                )
            });
        });
    }

    group.finish();
}

fn benchmark_full_sync(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let local = dir.path().join("local");
    let mount = dir.path().join("mnt");
    for d in 0..10 {
        let sub = local.join(format!("dir_{d}"));
        fs::create_dir_all(&sub).unwrap();
        for f in 0..50 {
            fs::write(sub.join(format!("file_{f}.txt")), vec![b'x'; 4096]).unwrap();
        }
    }
    fs::create_dir_all(&mount).unwrap();

    let mut config = Config::new(&mount);
    config.sync_directories = vec![DirectoryMapping::new(&local, "bench")];

    let mut group = c.benchmark_group("full_sync");
    group.sample_size(10);

    let ungated = Reconciler::new(config.clone(), Arc::new(MetadataStore::in_memory()));
    group.bench_function("500_files_ungated", |b| b.iter(|| ungated.full_sync()));

    config.engine.gate_full_sync = true;
    let gated = Reconciler::new(config, Arc::new(MetadataStore::in_memory()));
    gated.full_sync();
    group.bench_function("500_files_gated", |b| b.iter(|| gated.full_sync()));

    group.finish();
}

criterion_group!(benches, benchmark_policy_and_mapping, benchmark_full_sync);
criterion_main!(benches);
