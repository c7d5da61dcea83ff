use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use mesa_core::ProductId;
use mesa_inventory::{
    Demand, OrderLineItem, StockRecord, UnresolvedProductPolicy, plan_decrease, snapshot_of,
};

fn bench_plan_decrease(c: &mut Criterion) {
    let mut group = c.benchmark_group("plan_decrease");

    for size in [1usize, 10, 100] {
        let records: Vec<StockRecord> = (0..size)
            .map(|i| StockRecord::tracked(ProductId::new(), format!("item-{i}"), 1_000, 10).unwrap())
            .collect();
        let items: Vec<OrderLineItem> = records
            .iter()
            .map(|r| OrderLineItem::new(r.product_id, 3, 500).unwrap())
            .collect();
        let snapshot = snapshot_of(records);

        group.bench_with_input(BenchmarkId::from_parameter(size), &items, |b, items| {
            b.iter(|| {
                let demand = Demand::from_lines(black_box(items)).unwrap();
                plan_decrease(&snapshot, &demand, UnresolvedProductPolicy::Skip).unwrap()
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_plan_decrease);
criterion_main!(benches);
