// Welch's unequal-variance t-test on summary statistics
//
// Used by the circular test, which only has group means/variances/sizes
// rather than raw samples. The Student-t tail uses statrs.

use statrs::distribution::{ContinuousCDF, StudentsT};

/// Two-sided p-value of `t` under a Student-t distribution with `dof` degrees of freedom
///
/// Returns NaN when `t` or `dof` is NaN or `dof` is not positive.
pub fn student_t_two_sided(t: f64, dof: f64) -> f64 {
    if t.is_nan() || dof.is_nan() || dof <= 0.0 {
        return f64::NAN;
    }
    match StudentsT::new(0.0, 1.0, dof) {
        Ok(dist) => 2.0 * dist.cdf(-t.abs()),
        Err(_) => f64::NAN,
    }
}

/// Welch's t-test from summary statistics
///
/// Returns `(p, t)` in that order.
///
/// - `t = (mean_a - mean_b) / sqrt(var_a/n_a + var_b/n_b)`
/// - `dof` by the Welch-Satterthwaite approximation
/// - `p = 2 * cdf(dof, -|t|)`
///
/// # Example
/// ```
/// use phenostat::stats::welch_ttest;
///
/// let (p, t) = welch_ttest(10.0, 1.0, 10, 12.0, 1.0, 10);
/// assert!(t < 0.0);
/// assert!(p < 0.001);
/// ```
pub fn welch_ttest(
    mean_a: f64,
    var_a: f64,
    n_a: usize,
    mean_b: f64,
    var_b: f64,
    n_b: usize,
) -> (f64, f64) {
    let na = n_a as f64;
    let nb = n_b as f64;
    let adof = na - 1.0;
    let bdof = nb - 1.0;

    let se_a = var_a / na;
    let se_b = var_b / nb;

    let t = (mean_a - mean_b) / (se_a + se_b).sqrt();
    let dof = (se_a + se_b).powi(2) / (var_a.powi(2) / (na * na * adof) + var_b.powi(2) / (nb * nb * bdof));

    (student_t_two_sided(t, dof), t)
}
