// Property checks for the pure accounting and bar helpers.
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use poll_trader::bars::aggregate;
use poll_trader::domain::PriceBar;
use poll_trader::positions::PositionAccount;

fn bars_from(raw: &[(f64, f64)]) -> Vec<PriceBar> {
    let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    raw.iter()
        .enumerate()
        .map(|(i, &(close, volume))| PriceBar {
            ts: t0 + chrono::Duration::minutes(i as i64),
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume,
        })
        .collect()
}

proptest! {
    #[test]
    fn weighted_average_ignores_fold_order(
        fills in prop::collection::vec((0.001f64..100.0, 1.0f64..10_000.0), 1..30)
    ) {
        let qty: f64 = fills.iter().map(|(q, _)| q).sum();
        let expected = fills.iter().map(|(q, p)| q * p).sum::<f64>() / qty;

        let mut fwd = PositionAccount::default();
        for &(q, p) in &fills {
            fwd.fold(q, p);
        }
        let mut rev = PositionAccount::default();
        for &(q, p) in fills.iter().rev() {
            rev.fold(q, p);
        }

        prop_assert!((fwd.avg_price - expected).abs() <= 1e-6 * expected);
        prop_assert!((rev.avg_price - expected).abs() <= 1e-6 * expected);
        prop_assert!((fwd.qty - qty).abs() <= 1e-9 * qty.max(1.0));
    }

    #[test]
    fn aggregate_drops_partial_window_and_sums_volume(
        raw in prop::collection::vec((50.0f64..150.0, 0.0f64..10.0), 0..60),
        periods in 1usize..7
    ) {
        let bars = bars_from(&raw);
        let out = aggregate(&bars, periods);
        prop_assert_eq!(out.len(), bars.len() / periods);

        for (i, agg) in out.iter().enumerate() {
            let w = &bars[i * periods..(i + 1) * periods];
            let vol: f64 = w.iter().map(|b| b.volume).sum();
            prop_assert!((agg.volume - vol).abs() < 1e-9);
            prop_assert_eq!(agg.open, w[0].open);
            prop_assert_eq!(agg.close, w[periods - 1].close);
            prop_assert_eq!(agg.ts, w[0].ts);
            prop_assert_eq!(agg.high, w.iter().map(|b| b.high).fold(f64::MIN, f64::max));
            prop_assert_eq!(agg.low, w.iter().map(|b| b.low).fold(f64::MAX, f64::min));
        }
    }
}
