//! Benchmarks for depth reconciliation

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use crossfeed::orderbook::{DepthSnapshot, DepthUpdate, Level};
use crossfeed::DepthReconciler;
use rust_decimal::Decimal;
use std::str::FromStr;

fn create_snapshot(seq: u64, levels: usize) -> DepthSnapshot {
    let size = Decimal::from_str("1.5").unwrap();
    let bids: Vec<Level> = (0..levels)
        .map(|i| Level::new(Decimal::from(50000 - i as i64), size))
        .collect();
    let asks: Vec<Level> = (0..levels)
        .map(|i| Level::new(Decimal::from(50001 + i as i64), size))
        .collect();

    DepthSnapshot {
        seq,
        timestamp: 1672531200000,
        bids,
        asks,
    }
}

fn create_update(prev_seq: u64) -> DepthUpdate {
    DepthUpdate {
        prev_seq,
        seq: prev_seq + 1,
        timestamp: 1672531200000,
        bids: vec![Level::new(
            Decimal::from(49999),
            Decimal::from_str("2.0").unwrap(),
        )],
        asks: vec![Level::new(
            Decimal::from(50001),
            Decimal::from_str("2.5").unwrap(),
        )],
    }
}

fn benchmark_apply_snapshot(c: &mut Criterion) {
    let snapshot = create_snapshot(1000, 100);

    c.bench_function("apply_snapshot_100_levels", |b| {
        b.iter(|| {
            let mut reconciler = DepthReconciler::new();
            reconciler.apply_snapshot("btcusdt@depth@100ms", black_box(snapshot.clone()));
        })
    });
}

fn benchmark_apply_incremental(c: &mut Criterion) {
    let mut reconciler = DepthReconciler::new();
    reconciler.apply_snapshot("btcusdt@depth@100ms", create_snapshot(1000, 100));

    c.bench_function("apply_incremental", |b| {
        let mut seq = 1000u64;
        b.iter(|| {
            let update = create_update(seq);
            seq += 1;
            reconciler
                .apply_incremental("btcusdt@depth@100ms", "BTC/USDT", black_box(&update))
                .unwrap();
        })
    });
}

fn benchmark_apply_refresh(c: &mut Criterion) {
    let mut reconciler = DepthReconciler::new();

    c.bench_function("apply_refresh_20_levels", |b| {
        let mut seq = 0u64;
        b.iter(|| {
            seq += 1;
            reconciler
                .apply_refresh("btcusdt@depth20", "BTC/USDT", black_box(create_snapshot(seq, 20)))
                .unwrap();
        })
    });
}

criterion_group!(
    benches,
    benchmark_apply_snapshot,
    benchmark_apply_incremental,
    benchmark_apply_refresh
);
criterion_main!(benches);
