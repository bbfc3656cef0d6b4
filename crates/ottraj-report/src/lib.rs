mod bundle;
mod hashing;

pub use bundle::TrajectoryBundle;
pub use hashing::{ArrayDigest, HashRef};
