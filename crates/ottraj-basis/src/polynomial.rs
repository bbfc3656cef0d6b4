use crate::bezier::falling;

/// Horner evaluation of `sum_i coeffs[i] * s^i`
pub fn eval_monomial(coeffs: &[f64], s: f64) -> f64 {
    coeffs.iter().rev().fold(0.0, |acc, c| acc * s + c)
}

/// k-th derivative with respect to s of the monomial polynomial
pub fn eval_monomial_derivative(coeffs: &[f64], s: f64, k: usize) -> f64 {
    if k == 0 {
        return eval_monomial(coeffs, s);
    }
    coeffs
        .iter()
        .enumerate()
        .skip(k)
        .rev()
        .fold(0.0, |acc, (i, c)| acc * s + c * falling(i, k))
}
