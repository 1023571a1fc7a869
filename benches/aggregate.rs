use criterion::{black_box, criterion_group, criterion_main, Criterion};
use std::sync::Arc;
use tally::agg::{AggKind, AggSpec};
use tally::expr::FieldRef;
use tally::operators::MemorySource;
use tally::{AggregateOpBuilder, Batch, Puller, RuntimeContext, TypeContext, Value};

fn make_input(ctx: &TypeContext, rows: i64, keys: i64) -> Vec<Batch> {
    let records: Vec<Value> = (0..rows)
        .map(|i| {
            Value::record(
                ctx,
                vec![
                    ("a", Value::int64(ctx, i % keys)),
                    ("b", Value::int64(ctx, i)),
                ],
            )
        })
        .collect();
    records.chunks(256).map(|c| Batch::new(c.to_vec())).collect()
}

fn bench_aggregate(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("sum_by_key_10k_rows", |b| {
        b.iter(|| {
            runtime.block_on(async {
                let rctx = Arc::new(RuntimeContext::new());
                let ctx = rctx.type_context().clone();
                let input = make_input(&ctx, 10_000, 64);
                let mut op = AggregateOpBuilder::new()
                    .key("a", Arc::new(FieldRef::new(ctx.clone(), "a")))
                    .agg(
                        "sum",
                        AggSpec::new(AggKind::Sum, Some(Arc::new(FieldRef::new(ctx.clone(), "b")))),
                    )
                    .build(rctx, Box::new(MemorySource::new(input)))
                    .unwrap();
                let mut rows = 0usize;
                while let Some(batch) = op.pull(false).await.unwrap() {
                    rows += batch.len();
                }
                black_box(rows)
            })
        })
    });
}

criterion_group!(benches, bench_aggregate);
criterion_main!(benches);
