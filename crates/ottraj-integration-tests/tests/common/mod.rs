use ottraj_planner::TrajectoryProblem;
use ottraj_types::{BoundaryPack, Corridor, DynamicLimits, TrajectoryConfig};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Three boxes turning a corner, from the origin to (4, 5, 0)
pub fn corner(times: [f64; 3]) -> TrajectoryProblem {
    let walls = [
        ([-1.0, -1.0, -1.0], [3.0, 1.0, 1.0]),
        ([2.0, -1.0, -1.0], [4.0, 5.0, 1.0]),
        ([3.0, 4.0, -1.0], [5.0, 6.0, 1.0]),
    ];
    let corridors = walls.iter().zip(times).map(|(&(lo, hi), t)| Corridor::new(lo, hi, t)).collect();
    TrajectoryProblem::new(
        TrajectoryConfig::default(),
        corridors,
        BoundaryPack::at_rest([0.0, 0.0, 0.0]),
        BoundaryPack::at_rest([4.0, 5.0, 0.0]),
    )
    .unwrap()
}

/// Five boxes zig-zagging upwards, with dynamic limits and a safety margin
pub fn staircase() -> TrajectoryProblem {
    let config = TrajectoryConfig {
        margin: 0.05,
        limits: DynamicLimits {
            velocity: Some(6.0),
            acceleration: Some(12.0),
        },
        ..TrajectoryConfig::default()
    };
    let corridors = vec![
        Corridor::new([-0.5, -0.5, -0.5], [2.5, 0.5, 0.5], 1.2),
        Corridor::new([1.5, -0.5, -0.5], [2.5, 0.5, 2.5], 1.0),
        Corridor::new([1.5, -0.5, 1.5], [4.5, 0.5, 2.5], 1.4),
        Corridor::new([3.5, -0.5, 1.5], [4.5, 2.5, 2.5], 1.0),
        Corridor::new([3.5, 1.5, 1.5], [6.5, 2.5, 2.5], 1.6),
    ];
    TrajectoryProblem::new(
        config,
        corridors,
        BoundaryPack::at_rest([0.0, 0.0, 0.0]),
        BoundaryPack::at_rest([6.0, 2.0, 2.0]),
    )
    .unwrap()
}
