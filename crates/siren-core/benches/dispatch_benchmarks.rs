use criterion::{criterion_group, criterion_main, Criterion};
use siren_core::{Dispatcher, MaintenanceAction, TransitionKind};
use siren_schema::{IncidentId, Location, SirenConfig, UnitId};
use siren_store::MemoryStore;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

fn memory_dispatcher() -> Dispatcher {
    let config = SirenConfig::default();
    let d = Dispatcher::from_config(Arc::new(MemoryStore::new()), &config).unwrap();
    d.provision(&config).unwrap();
    d
}

fn run_cycle(d: &Dispatcher, id: &IncidentId, unit: &UnitId) {
    d.create_incident(id, Location::new(10.0, 20.0)).unwrap();
    for kind in TransitionKind::ALL {
        d.transition_incident(id, kind, Some(unit)).unwrap();
    }
    d.maintain(unit, MaintenanceAction::Refuel).unwrap();
    d.maintain(unit, MaintenanceAction::Repair).unwrap();
}

fn bench_cycle_memory(c: &mut Criterion) {
    let d = memory_dispatcher();
    let unit = UnitId::from("AMB-01");
    let seq = AtomicU64::new(0);
    c.bench_function("dispatch_cycle_memory", |b| {
        b.iter(|| {
            let id = IncidentId::from(format!("B{}", seq.fetch_add(1, Ordering::Relaxed)));
            run_cycle(&d, &id, &unit);
        });
    });
}

fn bench_cycle_file(c: &mut Criterion) {
    let unit = UnitId::from("AMB-01");
    let id = IncidentId::from("B0");
    c.bench_function("dispatch_cycle_file", |b| {
        b.iter_with_setup(
            || {
                let store_dir = tempfile::tempdir().unwrap();
                let config = SirenConfig::default();
                let d = Dispatcher::open(store_dir.path(), &config).unwrap();
                d.provision(&config).unwrap();
                (store_dir, d)
            },
            |(_sd, d)| {
                run_cycle(&d, &id, &unit);
            },
        );
    });
}

fn bench_snapshot(c: &mut Criterion) {
    let d = memory_dispatcher();
    let unit = UnitId::from("AMB-02");
    for i in 0..200 {
        run_cycle(&d, &IncidentId::from(format!("S{i}")), &unit);
    }
    c.bench_function("snapshot_200_closed", |b| {
        b.iter(|| d.snapshot().unwrap());
    });
}

criterion_group!(
    benches,
    bench_cycle_memory,
    bench_cycle_file,
    bench_snapshot
);
criterion_main!(benches);
