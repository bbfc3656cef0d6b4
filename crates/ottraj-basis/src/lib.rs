mod bezier;
mod polynomial;

pub use bezier::{bezier_to_monomial, binomial, falling, monomial_energy, monomial_to_bezier, BezierBasis};
pub use polynomial::{eval_monomial, eval_monomial_derivative};

#[cfg(test)]
mod tests;
