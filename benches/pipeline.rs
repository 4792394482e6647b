// Allow our dollar.cents digit grouping convention (e.g., 100_00 = $100.00)
#![allow(clippy::inconsistent_digit_grouping)]

//! Planning pipeline benchmarks: drift → legs → venue routing.

use ballast::config::Config;
use ballast::drift;
use ballast::plan;
use ballast::routing;
use ballast::types::{Asset, Holding, PriceMap, Venue};
use chrono::{TimeZone, Utc};
use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

/// Synthetic account: `n` assets spread over both venues plus a quote
/// buffer, prices drifting with a simple deterministic RNG.
fn synthetic_account(n: usize) -> (Vec<Holding>, PriceMap, Vec<(Asset, f64)>) {
    let mut holdings = Vec::new();
    let mut prices = PriceMap::default();
    let mut targets = Vec::new();

    // xorshift32
    let mut rng_state: u32 = 42;
    let mut next = || {
        rng_state ^= rng_state << 13;
        rng_state ^= rng_state >> 17;
        rng_state ^= rng_state << 5;
        rng_state
    };

    let weight = 0.8 / n as f64;
    for i in 0..n {
        let asset = Asset::new(&format!("A{i:03}"));
        let price = 1_00 + (next() % 500_000_00) as i64;
        let quantity = 0.1 + (next() % 1_000) as f64 / 100.0;
        let venue = if next() % 2 == 0 {
            Venue::Standard
        } else {
            Venue::Pro
        };
        prices.insert(asset, price);
        holdings.push(Holding {
            asset,
            venue,
            quantity,
        });
        targets.push((asset, weight));
    }

    let quote = Asset::new("USDT");
    prices.insert(quote, 1_00);
    holdings.push(Holding {
        asset: quote,
        venue: Venue::Pro,
        quantity: 100_000.0,
    });
    targets.push((quote, 0.2));

    (holdings, prices, targets)
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    let config = Config::default();
    let now = Utc.with_ymd_and_hms(2026, 3, 7, 12, 0, 0).unwrap();

    for n in [8usize, 32, 128] {
        let (holdings, prices, targets) = synthetic_account(n);

        group.bench_with_input(BenchmarkId::new("drift_to_plan", n), &n, |b, _| {
            b.iter(|| {
                let valuation = drift::value_holdings(&holdings, &prices).unwrap();
                let drift_vec = drift::compute_drift(&valuation, &targets);
                let legs = plan::generate(
                    &drift_vec,
                    valuation.total_cents,
                    &prices,
                    &config.lots,
                    config.trade.min_trade_cents(),
                    config.trade.quote(),
                )
                .unwrap();
                black_box(legs)
            })
        });

        group.bench_with_input(BenchmarkId::new("full_routing", n), &n, |b, _| {
            b.iter(|| {
                let valuation = drift::value_holdings(&holdings, &prices).unwrap();
                let drift_vec = drift::compute_drift(&valuation, &targets);
                let legs = plan::generate(
                    &drift_vec,
                    valuation.total_cents,
                    &prices,
                    &config.lots,
                    config.trade.min_trade_cents(),
                    config.trade.quote(),
                )
                .unwrap();
                let plan = routing::assign_venues(&legs, &holdings, &prices, &config, now).unwrap();
                black_box(plan)
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_pipeline);
criterion_main!(benches);
