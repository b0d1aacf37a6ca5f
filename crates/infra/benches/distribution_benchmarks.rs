use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use chrono::{Duration, Utc};
use cyclekit_auth::Principal;
use cyclekit_core::{EnterpriseId, OrderCycleId, ProductId, UserId, VariantId};
use cyclekit_infra::store::{InMemoryOrderCycleStore, OrderCycleStore};
use cyclekit_order_cycles::{Catalog, CycleQuery, Enterprise, NewExchange, OrderCycleDraft};

/// One coordinator, one distributor and `products` products with a master
/// and two child variants each. Every third product ships its master only.
fn setup(products: usize) -> (InMemoryOrderCycleStore, OrderCycleId, EnterpriseId) {
    let hub = EnterpriseId::new();
    let shop = EnterpriseId::new();
    let mut catalog = Catalog::new();
    catalog.insert_enterprise(Enterprise::new(hub, "Hub"));
    catalog.insert_enterprise(Enterprise::new(shop, "Shop"));

    let mut carried: Vec<VariantId> = Vec::with_capacity(products * 2);
    for i in 0..products {
        let product = ProductId::new();
        let master = catalog.insert_product(product, format!("Product {i}"));
        let first = catalog.insert_variant(product).unwrap();
        let _second = catalog.insert_variant(product).unwrap();
        if i % 3 == 0 {
            carried.push(master);
        } else {
            carried.push(first);
        }
    }

    let store = InMemoryOrderCycleStore::new(catalog);
    let now = Utc::now();
    let oc = store
        .create_order_cycle(
            OrderCycleDraft::new("Bench round", hub).with_window(now - Duration::hours(1), now + Duration::days(6)),
        )
        .unwrap();
    store
        .add_exchange(oc.id, NewExchange::incoming(hub, hub).with_variants(carried.iter().copied()))
        .unwrap();
    store
        .add_exchange(oc.id, NewExchange::outgoing(hub, shop).with_variants(carried))
        .unwrap();
    (store, oc.id, shop)
}

fn bench_valid_products(c: &mut Criterion) {
    let mut group = c.benchmark_group("valid_products_distributed_by");
    for products in [10usize, 100, 1_000] {
        let (store, oc_id, shop) = setup(products);
        let snapshot = store.snapshot().unwrap();
        group.throughput(Throughput::Elements(products as u64));
        group.bench_with_input(BenchmarkId::from_parameter(products), &products, |b, _| {
            b.iter(|| {
                let distribution = snapshot.distribution(oc_id).unwrap();
                black_box(distribution.valid_products_distributed_by(black_box(shop)).len())
            })
        });
    }
    group.finish();
}

fn bench_accessible_by(c: &mut Criterion) {
    let mut group = c.benchmark_group("accessible_by");
    for cycles in [10usize, 100, 1_000] {
        let hub = EnterpriseId::new();
        let mut catalog = Catalog::new();
        catalog.insert_enterprise(Enterprise::new(hub, "Hub"));
        let store = InMemoryOrderCycleStore::new(catalog);
        for i in 0..cycles {
            store
                .create_order_cycle(OrderCycleDraft::new(format!("Round {i}"), hub))
                .unwrap();
        }
        let snapshot = store.snapshot().unwrap();
        let manager = Principal::manager(UserId::new(), [hub]);
        let query = CycleQuery::accessible_by(&manager);
        let now = Utc::now();

        group.throughput(Throughput::Elements(cycles as u64));
        group.bench_with_input(BenchmarkId::from_parameter(cycles), &cycles, |b, _| {
            b.iter(|| black_box(query.run(&snapshot, now).len()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_valid_products, bench_accessible_by);
criterion_main!(benches);
