use std::sync::Arc;

use cache_store::{CacheStore, InMemoryCacheStore};
use common::{UserId, VoucherId};
use criterion::{Criterion, criterion_group, criterion_main};

fn bench_reserve_accept(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("gate/reserve_accept", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryCacheStore::new();
                let voucher = VoucherId::new(1);
                store.seed_stock(voucher, 1).await.unwrap();
                store.try_reserve(voucher, UserId::new()).await.unwrap();
            });
        });
    });
}

fn bench_reserve_out_of_stock(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    let store = InMemoryCacheStore::new();
    let voucher = VoucherId::new(1);
    rt.block_on(store.seed_stock(voucher, 0)).unwrap();

    c.bench_function("gate/reserve_out_of_stock", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.try_reserve(voucher, UserId::new()).await.unwrap();
            });
        });
    });
}

fn bench_reserve_contended(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("gate/reserve_contended_32", |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = Arc::new(InMemoryCacheStore::new());
                let voucher = VoucherId::new(1);
                store.seed_stock(voucher, 16).await.unwrap();

                let mut handles = Vec::new();
                for _ in 0..32 {
                    let store = store.clone();
                    handles.push(tokio::spawn(async move {
                        store.try_reserve(voucher, UserId::new()).await.unwrap()
                    }));
                }
                for handle in handles {
                    handle.await.unwrap();
                }
            });
        });
    });
}

criterion_group!(
    benches,
    bench_reserve_accept,
    bench_reserve_out_of_stock,
    bench_reserve_contended
);
criterion_main!(benches);
