//! Frame-rate ranges and bitrate-driven frame-rate scaling
//!
//! The encoder advertises a table of supported `{min, max}` ranges. When the
//! bitrate drops below half of nominal the frame rate is degraded in steps of
//! 5 fps, never below 15, and snapped to the nearest supported range.

use serde::{Deserialize, Serialize};

/// Lowest frame rate the scaler will ask for
pub const MIN_SCALED_FPS: u32 = 15;

/// Bitrate ratio below which frame rate is degraded
const DEGRADE_BELOW_RATIO: f64 = 0.5;

/// Changes smaller than this are ignored
const FPS_DEBOUNCE: f64 = 1.0;

/// A supported frame-rate range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FpsRange {
    pub min: u32,
    pub max: u32,
}

impl FpsRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Range with both ends equal
    pub fn fixed(fps: u32) -> Self {
        Self { min: fps, max: fps }
    }

    pub fn is_valid(&self) -> bool {
        self.max > 0 && self.min <= self.max
    }
}

impl std::fmt::Display for FpsRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{},{}]", self.min, self.max)
    }
}

/// Supported frame-rate ranges, sorted by max then min
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FpsTable {
    ranges: Vec<FpsRange>,
}

impl FpsTable {
    /// Build a table, dropping malformed ranges
    pub fn new(ranges: impl IntoIterator<Item = FpsRange>) -> Self {
        let mut ranges: Vec<FpsRange> = ranges
            .into_iter()
            .filter(|range| {
                if !range.is_valid() {
                    tracing::warn!("Ignoring malformed fps range {}", range);
                }
                range.is_valid()
            })
            .collect();
        ranges.sort_by_key(|r| (r.max, r.min));
        ranges.dedup();
        Self { ranges }
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn ranges(&self) -> &[FpsRange] {
        &self.ranges
    }

    /// Range whose max is closest to `fps`, lower range on ties
    pub fn nearest(&self, fps: f64) -> Option<FpsRange> {
        let mut best: Option<(f64, FpsRange)> = None;
        for range in &self.ranges {
            let distance = (range.max as f64 - fps).abs();
            match best {
                Some((best_distance, _)) if distance >= best_distance => {}
                _ => best = Some((distance, *range)),
            }
        }
        best.map(|(_, range)| range)
    }

    /// Range used when the stream runs at full rate
    ///
    /// Falls back to a fixed `max_fps` range when nothing usable is advertised.
    pub fn ceiling(&self, max_fps: u32) -> FpsRange {
        self.nearest(max_fps as f64)
            .unwrap_or_else(|| FpsRange::fixed(max_fps))
    }
}

/// Frame rate to aim for at `bitrate` out of `nominal`
pub fn target_fps(bitrate: u32, nominal: u32, max_fps: u32) -> f64 {
    if nominal == 0 {
        return max_fps as f64;
    }
    let ratio = bitrate as f64 / nominal as f64;
    if ratio < DEGRADE_BELOW_RATIO {
        let stepped = ((max_fps as f64 * ratio * 0.4) / 5.0).floor() * 5.0;
        stepped.max(MIN_SCALED_FPS as f64)
    } else {
        max_fps as f64
    }
}

/// True when the move from `current` to `target` is too small to act on
pub fn is_debounced(current: f64, target: f64) -> bool {
    (target - current).abs() < FPS_DEBOUNCE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> FpsTable {
        FpsTable::new([
            FpsRange::fixed(30),
            FpsRange::fixed(15),
            FpsRange::fixed(20),
        ])
    }

    #[test]
    fn test_table_sorted_and_filtered() {
        let table = FpsTable::new([
            FpsRange::fixed(30),
            FpsRange::new(20, 10),
            FpsRange::fixed(0),
            FpsRange::new(15, 30),
            FpsRange::fixed(30),
        ]);
        assert_eq!(
            table.ranges(),
            &[FpsRange::new(15, 30), FpsRange::fixed(30)]
        );
    }

    #[test]
    fn test_nearest_range() {
        let table = table();
        assert_eq!(table.nearest(15.0), Some(FpsRange::fixed(15)));
        assert_eq!(table.nearest(18.0), Some(FpsRange::fixed(20)));
        assert_eq!(table.nearest(26.0), Some(FpsRange::fixed(30)));
        assert_eq!(table.nearest(60.0), Some(FpsRange::fixed(30)));
        assert_eq!(FpsTable::default().nearest(30.0), None);
    }

    #[test]
    fn test_ceiling_fallback() {
        assert_eq!(table().ceiling(30), FpsRange::fixed(30));
        assert_eq!(table().ceiling(24), FpsRange::fixed(20));
        assert_eq!(FpsTable::default().ceiling(30), FpsRange::fixed(30));
    }

    #[test]
    fn test_target_fps_formula() {
        // At or above half rate the ceiling applies
        assert_eq!(target_fps(1_000_000, 2_000_000, 30), 30.0);
        assert_eq!(target_fps(2_000_000, 2_000_000, 30), 30.0);

        // Below half rate: floor(30 * 0.35 * 0.4 / 5) * 5 = 0, clamped to 15
        assert_eq!(target_fps(700_000, 2_000_000, 30), 15.0);

        // A high ceiling lets the formula step above the minimum
        // floor(120 * 0.45 * 0.4 / 5) * 5 = 20
        assert_eq!(target_fps(450_000, 1_000_000, 120), 20.0);

        assert_eq!(target_fps(100, 0, 30), 30.0);
    }

    #[test]
    fn test_debounce() {
        assert!(is_debounced(30.0, 30.0));
        assert!(is_debounced(30.0, 29.5));
        assert!(!is_debounced(30.0, 29.0));
        assert!(!is_debounced(15.0, 30.0));
    }
}
