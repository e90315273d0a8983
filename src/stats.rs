pub fn arithmetic_mean(x: &[f64]) -> f64 {
    x.iter().sum::<f64>() / x.len() as f64
}

/// Complementary error function, rational approximation (|error| < 1.2e-7).
fn erfc(x: f64) -> f64 {
    let t = 1.0 / (1.0 + 0.5 * x.abs());
    let exponent = -x * x - 1.26551223
        + t * (1.00002368
            + t * (0.37409196
                + t * (0.09678418
                    + t * (-0.18628806
                        + t * (0.27886807
                            + t * (-1.13520398
                                + t * (1.48851587 + t * (-0.82215223 + t * 0.17087277))))))));
    let ans = t * exponent.exp();
    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}

/// Upper-tail probability of the standard normal distribution.
pub fn normal_sf(z: f64) -> f64 {
    0.5 * erfc(z / std::f64::consts::SQRT_2)
}

/// Two-tailed p-value for a standard normal statistic.
pub fn two_tailed_p(z: f64) -> f64 {
    (2.0 * normal_sf(z.abs())).min(1.0)
}

/// One-proportion z statistic of `successes`/`n` against the null rate `p0`.
///
/// Degenerate inputs (empty sample, null rate at 0 or 1) yield 0.
pub fn one_proportion_z(successes: usize, n: usize, p0: f64) -> f64 {
    if n == 0 || p0 <= 0.0 || p0 >= 1.0 {
        return 0.0;
    }
    let phat = successes as f64 / n as f64;
    let se = (p0 * (1.0 - p0) / n as f64).sqrt();
    (phat - p0) / se
}

/// Pooled two-proportion z statistic between `x1`/`n1` and `x2`/`n2`.
///
/// Zero when either sample is empty or the pooled rate is degenerate.
pub fn two_proportion_z(x1: usize, n1: usize, x2: usize, n2: usize) -> f64 {
    if n1 == 0 || n2 == 0 {
        return 0.0;
    }
    let p1 = x1 as f64 / n1 as f64;
    let p2 = x2 as f64 / n2 as f64;
    let pooled = (x1 + x2) as f64 / (n1 + n2) as f64;
    let se = (pooled * (1.0 - pooled) * (1.0 / n1 as f64 + 1.0 / n2 as f64)).sqrt();
    if se == 0.0 {
        return 0.0;
    }
    (p1 - p2) / se
}
