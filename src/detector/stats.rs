// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Tail probabilities for the anomaly test.
//!
//! The detector needs two-sided tails of a normal and a Poisson
//! distribution at thresholds around 1e-9, so the complementary error
//! function must stay accurate far out in the tail. The rational
//! approximation used here has fractional error below 1.2e-7
//! everywhere, which is plenty at that magnitude.

/// Probability threshold under which a datum is considered anomalous.
///
/// Only values close to 0 are useful; the closer, the fewer detections.
pub const ANOMALOUS_THRESHOLD: f64 = 4e-9;

/// Complementary error function.
#[must_use]
pub fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);

    let ans = t
        * (-z * z - 1.265_512_23
            + t * (1.000_023_68
                + t * (0.374_091_96
                    + t * (0.096_784_18
                        + t * (-0.186_288_06
                            + t * (0.278_868_07
                                + t * (-1.135_203_98
                                    + t * (1.488_515_87
                                        + t * (-0.822_152_23 + t * 0.170_872_77)))))))))
        .exp();

    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}

/// Natural log of the gamma function, for `x > 0`.
#[must_use]
pub fn ln_gamma(x: f64) -> f64 {
    const COF: [f64; 6] = [
        76.180_091_729_471_46,
        -86.505_320_329_416_77,
        24.014_098_240_830_91,
        -1.231_739_572_450_155,
        0.120_865_097_386_617_9e-2,
        -0.539_523_938_495_3e-5,
    ];

    let mut y = x;
    let tmp = x + 5.5;
    let tmp = tmp - (x + 0.5) * tmp.ln();
    let mut ser = 1.000_000_000_190_015;
    for c in COF {
        y += 1.0;
        ser += c / y;
    }

    -tmp + (2.506_628_274_631_000_5 * ser / x).ln()
}

/// Lower tail `P(X <= datum)` of a normal distribution.
#[must_use]
pub fn normal_lower_tail(mean: f64, stddev: f64, datum: f64) -> f64 {
    if stddev <= 0.0 {
        // Degenerate distribution, all mass at the mean
        return if datum >= mean { 1.0 } else { 0.0 };
    }
    let z = (datum - mean) / stddev;
    0.5 * erfc(-z / std::f64::consts::SQRT_2)
}

/// Upper tail `P(X >= datum)` of a normal distribution.
#[must_use]
pub fn normal_upper_tail(mean: f64, stddev: f64, datum: f64) -> f64 {
    if stddev <= 0.0 {
        return if datum <= mean { 1.0 } else { 0.0 };
    }
    let z = (datum - mean) / stddev;
    0.5 * erfc(z / std::f64::consts::SQRT_2)
}

fn poisson_pmf(lambda: f64, k: u64) -> f64 {
    (-lambda + (k as f64) * lambda.ln() - ln_gamma(k as f64 + 1.0)).exp()
}

/// Lower tail `P(X <= datum)` of a Poisson distribution.
#[must_use]
pub fn poisson_lower_tail(lambda: f64, datum: u64) -> f64 {
    if lambda <= 0.0 {
        // All mass at zero
        return 1.0;
    }

    let mut term = (-lambda).exp();
    let mut sum = term;
    for k in 1..=datum {
        term *= lambda / k as f64;
        sum += term;
    }
    sum.min(1.0)
}

/// Upper tail `P(X >= datum)` of a Poisson distribution.
///
/// Summed upward from the datum's own mass, so a far-out tail does not
/// drown in `1 - cdf` cancellation.
#[must_use]
pub fn poisson_upper_tail(lambda: f64, datum: u64) -> f64 {
    if datum == 0 {
        return 1.0;
    }
    if lambda <= 0.0 {
        return 0.0;
    }

    let mut term = poisson_pmf(lambda, datum);
    let mut sum = term;
    let mut k = datum;

    // The terms shrink geometrically once k > lambda
    loop {
        k += 1;
        term *= lambda / k as f64;
        sum += term;
        if term < sum * 1e-16 || k > datum + 10_000 {
            break;
        }
    }
    sum.min(1.0)
}

/// Two-sided anomaly test under both a normal and a Poisson model.
#[must_use]
pub fn datum_is_anomalous(mean: f64, stddev: f64, datum: u64) -> bool {
    let x = datum as f64;

    normal_lower_tail(mean, stddev, x) < ANOMALOUS_THRESHOLD
        || normal_upper_tail(mean, stddev, x) < ANOMALOUS_THRESHOLD
        || poisson_lower_tail(mean, datum) < ANOMALOUS_THRESHOLD
        || poisson_upper_tail(mean, datum) < ANOMALOUS_THRESHOLD
}

/// Standard deviation from a mean of squares and a mean.
///
/// Tiny negative variances from rounding are clamped to zero.
#[must_use]
pub fn stddev(mean_of_squares: f64, mean: f64) -> f64 {
    let variance = mean_of_squares - mean * mean;

    if variance > -1e-9 && variance <= 0.0 {
        return 0.0;
    }

    variance.sqrt()
}
