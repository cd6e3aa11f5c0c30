//! Entry table benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use ntsync_client::EntryTable;
use ntsync_protocol::{Entry, EntryUpdate, EntryValue};

fn populated_table(entries: usize) -> EntryTable {
    let table = EntryTable::new();
    for i in 0..entries {
        let entry = Entry::new(format!("/robot/sensor{:04}", i), EntryValue::Double(0.0))
            .unwrap()
            .with_id(i as u16);
        table.upsert_from_assign(entry);
    }
    table
}

fn bench_apply_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("table_apply_update");

    for entries in [100, 1000] {
        let table = populated_table(entries);
        let updates: Vec<_> = (0..entries)
            .map(|i| EntryUpdate::new(i as u16, 2, EntryValue::Double(i as f64)).unwrap())
            .collect();

        group.throughput(Throughput::Elements(entries as u64));
        group.bench_with_input(BenchmarkId::from_parameter(entries), &updates, |b, updates| {
            b.iter(|| {
                for update in updates {
                    black_box(table.apply_update(update.clone()));
                }
            });
        });
    }

    group.finish();
}

fn bench_prefix_queries(c: &mut Criterion) {
    let table = populated_table(1000);

    c.bench_function("table_keys_with_prefix", |b| {
        b.iter(|| black_box(table.keys_with_prefix("/robot/sensor01")));
    });
    c.bench_function("table_snapshot_all", |b| {
        b.iter(|| black_box(table.snapshot_with_prefix("")));
    });
}

criterion_group!(benches, bench_apply_update, bench_prefix_queries);

criterion_main!(benches);
