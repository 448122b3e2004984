use criterion::{Criterion, criterion_group, criterion_main};
use event_store::{BatchId, EventData, EventStore, InMemoryEventStore};

fn make_batch(aggregate_id: &str, first_local_seq: u64, count: u64) -> Vec<EventData> {
    (first_local_seq..first_local_seq + count)
        .map(|seq| {
            EventData::new(
                aggregate_id,
                seq,
                "OrderPlaced",
                serde_json::json!({"order_id": aggregate_id, "seq": seq}),
            )
        })
        .collect()
}

fn bench_save_single_event(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/save_single_event", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                store
                    .save(BatchId::new(), make_batch("order-1", 0, 1))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_save_batch_10(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("event_store/save_batch_10", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryEventStore::new();
                store
                    .save(BatchId::new(), make_batch("order-1", 0, 10))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_load_aggregate(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();

    rt.block_on(async {
        store
            .save(BatchId::new(), make_batch("order-1", 0, 100))
            .await
            .unwrap();
    });

    c.bench_function("event_store/load_100_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                store
                    .load(&"order-1".into(), 0, usize::MAX)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_stream_all_events(c: &mut Criterion) {
    use futures_util::StreamExt;

    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryEventStore::new();

    // Pre-populate with 1000 events across 10 aggregates
    rt.block_on(async {
        for n in 0..10 {
            let aggregate_id = format!("order-{n}");
            store
                .save(BatchId::new(), make_batch(&aggregate_id, 0, 100))
                .await
                .unwrap();
        }
    });

    c.bench_function("event_store/stream_1000_events", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut stream = store.stream(0).await.unwrap();
                let mut count = 0;
                while let Some(result) = stream.next().await {
                    result.unwrap();
                    count += 1;
                }
                assert_eq!(count, 1000);
            });
        });
    });
}

criterion_group!(
    benches,
    bench_save_single_event,
    bench_save_batch_10,
    bench_load_aggregate,
    bench_stream_all_events,
);
criterion_main!(benches);
