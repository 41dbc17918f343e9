//! Small numeric and time helpers shared by the engine.
use std::time::Duration;

/// Convert fractional seconds to a `Duration`.
/// - Negative, NaN and overflowing inputs map to zero / `Duration::MAX`
///   instead of panicking like `Duration::from_secs_f64`.
#[inline]
pub fn duration_from_secs_f64(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Highest and lowest valid readings of one cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extremes {
    pub high_cell: usize,
    pub high_v: f32,
    pub low_cell: usize,
    pub low_v: f32,
}

impl Extremes {
    #[inline]
    pub fn spread(&self) -> f32 {
        self.high_v - self.low_v
    }
}

/// Find the max and min among valid readings; ties go to the lowest index.
/// Returns `None` with fewer than two valid readings.
pub fn extremes(readings: &[Option<f32>]) -> Option<Extremes> {
    let mut valid = readings
        .iter()
        .enumerate()
        .filter_map(|(i, r)| r.filter(|v| v.is_finite()).map(|v| (i, v)));
    let (first_i, first_v) = valid.next()?;
    let mut ext = Extremes {
        high_cell: first_i,
        high_v: first_v,
        low_cell: first_i,
        low_v: first_v,
    };
    let mut count = 1usize;
    for (i, v) in valid {
        count += 1;
        if v > ext.high_v {
            ext.high_cell = i;
            ext.high_v = v;
        }
        if v < ext.low_v {
            ext.low_cell = i;
            ext.low_v = v;
        }
    }
    (count >= 2).then_some(ext)
}
