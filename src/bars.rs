// ===============================
// src/bars.rs
// ===============================
//
// K-line helpers:
// - aggregate       : resample 1-period bars into `periods`-sized bars
// - check_exception : data-quality filter for the newest two bars
//
use crate::domain::PriceBar;

/// Max absolute close-to-close jump accepted on a thin bar.
pub const MAX_JUMP: f64 = 10.0;
/// Bars with less volume than this are "thin".
pub const MIN_VOLUME: f64 = 1.0;

/// Resample `bars` into bars of `periods` source bars each.
///
/// A trailing partial window is dropped. Returns an empty vec when
/// `periods` is zero or there are fewer than `periods` bars.
pub fn aggregate(bars: &[PriceBar], periods: usize) -> Vec<PriceBar> {
    if periods == 0 {
        return Vec::new();
    }
    bars.chunks_exact(periods)
        .map(|w| {
            let first = &w[0];
            let last = &w[w.len() - 1];
            let mut high = f64::MIN;
            let mut low = f64::MAX;
            let mut volume = 0.0;
            for b in w {
                if b.high > high { high = b.high; }
                if b.low < low { low = b.low; }
                volume += b.volume;
            }
            PriceBar { ts: first.ts, open: first.open, high, low, close: last.close, volume }
        })
        .collect()
}

/// `true` when the newest bar looks like a real print.
///
/// Rejects a close that moved more than [`MAX_JUMP`] in either direction
/// while the newer bar traded less than [`MIN_VOLUME`].
pub fn check_exception(prev: &PriceBar, now: &PriceBar) -> bool {
    let thin = now.volume < MIN_VOLUME;
    if thin && now.close > prev.close + MAX_JUMP {
        return false;
    }
    if thin && now.close < prev.close - MAX_JUMP {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn bar(i: i64, o: f64, h: f64, l: f64, c: f64, v: f64) -> PriceBar {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        PriceBar { ts: t0 + Duration::minutes(i), open: o, high: h, low: l, close: c, volume: v }
    }

    #[test]
    fn aggregate_drops_partial_window() {
        let bars: Vec<_> = (0..7).map(|i| bar(i, 10.0 + i as f64, 11.0 + i as f64, 9.0 + i as f64, 10.5 + i as f64, 2.0)).collect();
        let out = aggregate(&bars, 3);
        assert_eq!(out.len(), 2);

        let a = out[0];
        assert_eq!(a.ts, bars[0].ts);
        assert_eq!(a.open, 10.0);
        assert_eq!(a.close, 12.5);
        assert_eq!(a.high, 13.0);
        assert_eq!(a.low, 9.0);
        assert_eq!(a.volume, 6.0);

        let b = out[1];
        assert_eq!(b.ts, bars[3].ts);
        assert_eq!(b.open, 13.0);
        assert_eq!(b.close, 15.5);
    }

    #[test]
    fn aggregate_high_low_not_from_edges() {
        let bars = vec![
            bar(0, 100.0, 101.0, 99.0, 100.0, 1.0),
            bar(1, 100.0, 120.0, 80.0, 100.0, 1.5),
            bar(2, 100.0, 102.0, 98.0, 101.0, 0.5),
        ];
        let out = aggregate(&bars, 3);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].high, 120.0);
        assert_eq!(out[0].low, 80.0);
        assert_eq!(out[0].volume, 3.0);
    }

    #[test]
    fn aggregate_short_input_is_empty() {
        let bars = vec![bar(0, 1.0, 1.0, 1.0, 1.0, 1.0)];
        assert!(aggregate(&bars, 2).is_empty());
        assert!(aggregate(&bars, 0).is_empty());
        assert_eq!(aggregate(&bars, 1).len(), 1);
    }

    #[test]
    fn filter_rejects_thin_jump() {
        let prev = bar(0, 100.0, 100.0, 100.0, 100.0, 5.0);
        let up = bar(1, 100.0, 115.0, 100.0, 115.0, 0.5);
        let down = bar(1, 100.0, 100.0, 85.0, 85.0, 0.5);
        assert!(!check_exception(&prev, &up));
        assert!(!check_exception(&prev, &down));
    }

    #[test]
    fn filter_accepts_small_move_or_real_volume() {
        let prev = bar(0, 100.0, 100.0, 100.0, 100.0, 5.0);
        let small = bar(1, 100.0, 108.0, 100.0, 108.0, 0.5);
        let heavy = bar(1, 100.0, 115.0, 100.0, 115.0, 3.0);
        assert!(check_exception(&prev, &small));
        assert!(check_exception(&prev, &heavy));
    }
}
