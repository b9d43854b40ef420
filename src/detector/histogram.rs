// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Alpha value for the fast EMA.
///
/// `(2 - alpha) / (2.8854 * alpha)` gives the half-life in generations.
pub const ALPHA_FAST: f64 = 0.3;

/// Alpha value for the slow EMA.
pub const ALPHA_SLOW: f64 = 0.05;

/// Peer-count history for a single host
///
/// Tracks a cumulative mean and mean-of-squares plus fast and slow
/// exponential moving averages of both, so standard deviations can be
/// recovered without storing the samples.
#[derive(Clone, Debug, Default)]
pub struct Histogram {
    /// Cumulative mean of the per-generation peer counts
    pub average: f64,

    /// Cumulative mean of the squared peer counts
    ///
    /// Variance falls out as `mean_of_squares - average^2`.
    pub mean_of_squares: f64,

    /// Fast exponential moving average
    pub ema_fast: f64,

    /// Slow exponential moving average
    pub ema_slow: f64,

    /// Fast EMA of the squares
    pub ema_fast_squared: f64,

    /// Slow EMA of the squares
    pub ema_slow_squared: f64,

    /// Last generation this histogram was rolled forward to
    pub generation: u64,

    /// Number of data points folded in
    pub count: u64,
}

fn new_average(previous: f64, value: f64, new_count: u64) -> f64 {
    previous + (value - previous) / new_count as f64
}

fn new_ema(previous: f64, value: f64, alpha: f64) -> f64 {
    alpha * value + (1.0 - alpha) * previous
}

impl Histogram {
    /// Folds one generation's peer count into the running statistics.
    ///
    /// The first datum seeds both EMAs with the raw value instead of
    /// decaying them up from zero.
    pub fn push_value(&mut self, value: u64) {
        let value = value as f64;
        let value_squared = value * value;

        self.count += 1;

        self.average = new_average(self.average, value, self.count);
        self.mean_of_squares = new_average(self.mean_of_squares, value_squared, self.count);

        if self.count == 1 {
            self.ema_fast = value;
            self.ema_slow = value;
            self.ema_fast_squared = value_squared;
            self.ema_slow_squared = value_squared;
        } else {
            self.ema_fast = new_ema(self.ema_fast, value, ALPHA_FAST);
            self.ema_slow = new_ema(self.ema_slow, value, ALPHA_SLOW);
            self.ema_fast_squared = new_ema(self.ema_fast_squared, value_squared, ALPHA_FAST);
            self.ema_slow_squared = new_ema(self.ema_slow_squared, value_squared, ALPHA_SLOW);
        }
    }
}
