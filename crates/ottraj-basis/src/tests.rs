// Property tests for basis conversions

#[cfg(test)]
mod tests {
    use crate::*;
    use nalgebra::DVector;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_basis_roundtrip(
            order in 1usize..9,
            seed in prop::collection::vec(-10.0f64..10.0, 9),
        ) {
            let basis = BezierBasis::new(order, 1).unwrap();
            let bezier = DVector::from_iterator(order + 1, seed.into_iter().take(order + 1));
            let mono = basis.m() * &bezier;
            let back = basis.m_inverse() * &mono;
            for (a, b) in back.iter().zip(bezier.iter()) {
                prop_assert!((a - b).abs() <= 1e-9 * (1.0 + b.abs()));
            }
        }

        #[test]
        fn test_bezier_endpoint_interpolation(
            seed in prop::collection::vec(-5.0f64..5.0, 7),
        ) {
            // Bezier curves pass through their first and last control points
            let basis = BezierBasis::new(6, 3).unwrap();
            let bezier = DVector::from_vec(seed.clone());
            let mono = basis.m() * &bezier;
            let coeffs: Vec<f64> = mono.iter().copied().collect();
            prop_assert!((eval_monomial(&coeffs, 0.0) - seed[0]).abs() < 1e-9);
            prop_assert!((eval_monomial(&coeffs, 1.0) - seed[6]).abs() < 1e-7);
        }
    }

    #[test]
    fn test_basis_rejects_bad_orders() {
        assert!(BezierBasis::new(0, 0).is_err());
        assert!(BezierBasis::new(3, 4).is_err());
    }
}
