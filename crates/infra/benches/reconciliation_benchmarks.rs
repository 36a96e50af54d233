use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use rust_decimal_macros::dec;
use stockledger_core::{ItemVariantId, LinePricing, LocationId, UserId};
use stockledger_infra::config::LedgerConfig;
use stockledger_infra::reconciliation::ReconciliationEngine;
use stockledger_infra::workflows::InMemoryWorkflows;
use stockledger_inventory::{
    DocumentRef, IdempotencyKey, MovementBatch, MovementKind, MovementRequest, StockKey,
};

fn manual_batch(operation: String, keys: &[StockKey], kind: MovementKind) -> MovementBatch {
    let user = UserId::new();
    MovementBatch::new(
        IdempotencyKey::new(DocumentRef::Manual, operation),
        keys.iter()
            .map(|key| {
                MovementRequest::movement(
                    key.item_variant_id,
                    key.location_id,
                    kind,
                    1,
                    DocumentRef::Manual,
                    user,
                )
            })
            .collect(),
    )
}

fn bench_apply_batch_latency(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply_batch_latency");

    for lines in [1usize, 10, 100].iter() {
        group.throughput(Throughput::Elements(*lines as u64));
        group.bench_with_input(BenchmarkId::new("lines", lines), lines, |b, &lines| {
            let engine = ReconciliationEngine::in_memory();
            let location = LocationId::new();
            let keys: Vec<StockKey> = (0..lines)
                .map(|_| StockKey::new(ItemVariantId::new(), location))
                .collect();
            let mut n = 0u64;

            b.iter(|| {
                n += 1;
                let batch = manual_batch(format!("op-{n}"), &keys, MovementKind::InitialStock);
                black_box(engine.apply_batch(&batch).unwrap());
            });
        });
    }

    group.finish();
}

fn bench_idempotent_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("idempotent_replay");

    group.bench_function("replay_recorded_batch", |b| {
        let engine = ReconciliationEngine::in_memory();
        let keys = [StockKey::new(ItemVariantId::new(), LocationId::new())];
        let batch = manual_batch("seed".to_string(), &keys, MovementKind::InitialStock);
        engine.apply_batch(&batch).unwrap();

        b.iter(|| {
            black_box(engine.apply_batch(black_box(&batch)).unwrap());
        });
    });

    group.finish();
}

fn bench_sale_checkout(c: &mut Criterion) {
    let mut group = c.benchmark_group("sale_checkout");

    group.bench_function("open_line_checkout", |b| {
        let workflows = InMemoryWorkflows::in_memory(LedgerConfig::default());
        let item = ItemVariantId::new();
        let user = UserId::new();

        b.iter(|| {
            // Numbers run out at 9999 per location and month; use a fresh location.
            let key = StockKey::new(item, LocationId::new());
            let seed = manual_batch(format!("seed-{key}"), &[key], MovementKind::InitialStock);
            workflows.engine().apply_batch(&seed).unwrap();

            let sale_id = workflows
                .open_sale(key.location_id, user)
                .unwrap()
                .document
                .id_typed();
            workflows
                .add_sale_line(
                    sale_id,
                    key.item_variant_id,
                    1,
                    LinePricing::new(dec!(4.50), dec!(0), dec!(20)),
                )
                .unwrap();
            black_box(workflows.checkout(sale_id, user).unwrap());
        });
    });

    group.finish();
}

fn bench_consistency_check(c: &mut Criterion) {
    let mut group = c.benchmark_group("verify_consistency");

    for pairs in [100usize, 1000].iter() {
        group.throughput(Throughput::Elements(*pairs as u64));
        group.bench_with_input(BenchmarkId::new("pairs", pairs), pairs, |b, &pairs| {
            let engine = ReconciliationEngine::in_memory();
            let location = LocationId::new();
            let keys: Vec<StockKey> = (0..pairs)
                .map(|_| StockKey::new(ItemVariantId::new(), location))
                .collect();
            engine
                .apply_batch(&manual_batch("seed".to_string(), &keys, MovementKind::InitialStock))
                .unwrap();

            b.iter(|| {
                black_box(engine.verify_consistency().unwrap());
            });
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_apply_batch_latency,
    bench_idempotent_replay,
    bench_sale_checkout,
    bench_consistency_check
);
criterion_main!(benches);
