use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use chrono::Utc;
use harvestry_core::{HarvestryEntityId, LicenseNumber, SiteId, SyncJobId};
use harvestry_infra::queue_store::{InMemorySyncStore, QueueStore};
use harvestry_sync::{EntityType, NewQueueItem, OperationType, QueueItem, idempotency_key};

fn license() -> LicenseNumber {
    LicenseNumber::parse("403-X0001").unwrap()
}

/// Store with `n` items for one license; every tenth depends on its predecessor.
fn populated_store(rt: &tokio::runtime::Runtime, n: usize) -> InMemorySyncStore {
    let store = InMemorySyncStore::new();
    let job = SyncJobId::new();
    let site = SiteId::new();
    let now = Utc::now();

    rt.block_on(async {
        let mut previous = None;
        for i in 0..n {
            let mut new = NewQueueItem::new(
                job,
                site,
                license(),
                EntityType::Package,
                OperationType::Create,
                HarvestryEntityId::new(),
                serde_json::json!({"Quantity": i}),
            );
            if let (true, Some(parent)) = (i % 10 == 9, previous) {
                new = new.depends_on(parent);
            }
            let item = QueueItem::create(new, now).unwrap();
            previous = Some(store.enqueue(item).await.unwrap());
        }
    });
    store
}

fn bench_ready_batch_selection(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
    let mut group = c.benchmark_group("ready_batch_selection");

    for size in [100usize, 1_000, 10_000] {
        let store = populated_store(&rt, size);
        let license = license();
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| {
                let batch = rt
                    .block_on(store.next_ready_batch(&license, 50, Utc::now()))
                    .unwrap();
                black_box(batch)
            });
        });
    }

    group.finish();
}

fn bench_idempotency_key(c: &mut Criterion) {
    let license = license();
    let entity = HarvestryEntityId::new();

    c.bench_function("idempotency_key", |b| {
        b.iter(|| {
            black_box(idempotency_key(
                black_box(&license),
                EntityType::Package,
                entity,
                OperationType::Adjust,
                Some("2024-06-01"),
            ))
        });
    });
}

criterion_group!(benches, bench_ready_batch_selection, bench_idempotency_key);
criterion_main!(benches);
