#[cfg(test)]
mod tests {
    use crate::*;
    use proptest::prelude::*;
    use sprs::TriMat;

    /// Three variables sharing a budget with a coupling cap and boxes
    fn budget_qp(q: [f64; 3]) -> QpInstance {
        let mut p = TriMat::new((3, 3));
        p.add_triplet(0, 0, 2.0);
        p.add_triplet(1, 1, 1.0);
        p.add_triplet(2, 2, 1.0);
        p.add_triplet(0, 1, 0.5);
        p.add_triplet(1, 0, 0.5);
        let mut a = TriMat::new((2, 3));
        a.add_triplet(0, 0, 1.0);
        a.add_triplet(0, 1, 1.0);
        a.add_triplet(0, 2, 1.0);
        a.add_triplet(1, 1, 1.0);
        a.add_triplet(1, 2, -1.0);
        QpInstance::new(
            p.to_csc(),
            q.to_vec(),
            a.to_csc(),
            vec![1.0, -0.3],
            vec![1.0, 0.3],
            vec![0.0, 0.0, 0.0],
            vec![0.6, 1.0, 1.0],
            7,
        )
    }

    fn stationarity_residual(qp: &QpInstance, res: &SolveResult) -> f64 {
        let mut r = qp.cost_gradient(&res.x);
        for (j, v) in res.lmdz.iter().enumerate() {
            r[j] += v;
        }
        for (i, row) in qp.a_rows().iter().enumerate() {
            for &(c, v) in row {
                r[c] += v * res.lmdy[i];
            }
        }
        r.iter().fold(0.0, |m, v| m.max(v.abs()))
    }

    #[test]
    fn test_backends_agree_on_primal_and_duals() {
        let qp = budget_qp([-1.0, -2.0, 0.5]);
        let results: Vec<SolveResult> = SolverKind::all()
            .iter()
            .map(|kind| kind.build().solve_once(&qp).unwrap())
            .collect();

        for res in &results {
            assert!(res.is_solved, "{} failed: {:?}", res.info.backend, res.info);
            assert_eq!(res.info.generation, 7);
            assert!(qp.max_violation(&res.x) < 1e-4, "{}", res.info.backend);
            assert!(stationarity_residual(&qp, res) < 1e-3, "{}", res.info.backend);
        }
        let reference = &results[2];
        for res in &results[..2] {
            assert!((res.objective - reference.objective).abs() < 1e-3, "{}", res.info.backend);
            for (a, b) in res.x.iter().zip(&reference.x) {
                assert!((a - b).abs() < 1e-3, "{}: {:?} vs {:?}", res.info.backend, res.x, reference.x);
            }
            for (a, b) in res.lmdy.iter().zip(&reference.lmdy) {
                assert!((a - b).abs() < 1e-2, "{}: {:?} vs {:?}", res.info.backend, res.lmdy, reference.lmdy);
            }
        }
    }

    #[test]
    fn test_dual_sign_follows_binding_side() {
        // Pushing x1 up makes x1 - x2 <= 0.3 bind on its upper side
        let qp = budget_qp([0.0, -3.0, 0.0]);
        for kind in SolverKind::all() {
            let res = kind.build().solve_once(&qp).unwrap();
            assert!(res.is_solved);
            assert!(res.lmdy[1] > 1e-3, "{:?}: {:?}", kind, res.lmdy);
        }

        // Pushing x2 up flips it to the lower side
        let qp = budget_qp([0.0, 0.0, -3.0]);
        for kind in SolverKind::all() {
            let res = kind.build().solve_once(&qp).unwrap();
            assert!(res.is_solved);
            assert!(res.lmdy[1] < -1e-3, "{:?}: {:?}", kind, res.lmdy);
        }
    }

    #[test]
    fn test_warm_start_matches_cold_solve() {
        let mut warm = ActiveSetBackend::new();
        for step in 0..5 {
            let shift = 0.05 * step as f64;
            let qp = budget_qp([-1.0 + shift, -2.0, 0.5 - shift]);
            let warm_res = warm.solve_once(&qp).unwrap();
            let cold_res = ActiveSetBackend::new().solve_once(&qp).unwrap();
            assert!(warm_res.is_solved && cold_res.is_solved);
            for (a, b) in warm_res.x.iter().zip(&cold_res.x) {
                assert!((a - b).abs() < 1e-9);
            }
        }
        assert!(warm.warm_start().is_warm());
        assert_eq!(warm.warm_start().solves, 5);
    }

    #[test]
    fn test_shape_change_resets_warm_start() {
        let mut backend = ActiveSetBackend::new();
        backend.solve_once(&budget_qp([-1.0, -2.0, 0.5])).unwrap();

        let mut p = TriMat::new((1, 1));
        p.add_triplet(0, 0, 1.0);
        let a = TriMat::<f64>::new((0, 1));
        let qp = QpInstance::new(p.to_csc(), vec![-2.0], a.to_csc(), vec![], vec![], vec![0.0], vec![1.0], 0);
        let res = backend.solve_once(&qp).unwrap();
        assert!(res.is_solved);
        assert!(!res.info.cold_restart);
        assert!((res.x[0] - 1.0).abs() < 1e-12);
        assert!((res.lmdz[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_solver_kind_serde_and_names() {
        let json = serde_json::to_string(&SolverKind::InteriorPoint).unwrap();
        assert_eq!(json, "\"interior-point\"");
        let kind: SolverKind = serde_json::from_str("\"active-set\"").unwrap();
        assert_eq!(kind, SolverKind::ActiveSet);

        let names: Vec<&str> = SolverKind::all().iter().map(|k| k.build().name()).collect();
        assert_eq!(names, vec!["admm", "interior-point", "active-set"]);
    }

    #[test]
    fn test_malformed_instance_is_error() {
        let mut qp = budget_qp([0.0; 3]);
        qp.clb.pop();
        for kind in SolverKind::all() {
            assert!(kind.build().solve_once(&qp).is_err());
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_active_set_solution_is_feasible_and_stationary(
            q0 in -3.0f64..3.0,
            q1 in -3.0f64..3.0,
            q2 in -3.0f64..3.0,
        ) {
            let qp = budget_qp([q0, q1, q2]);
            let res = ActiveSetBackend::new().solve_once(&qp).unwrap();
            prop_assert!(res.is_solved);
            prop_assert!(qp.max_violation(&res.x) < 1e-9);
            prop_assert!(stationarity_residual(&qp, &res) < 1e-8);
        }
    }
}
