pub mod aggregate;
pub mod resolution;

pub use aggregate::{aggregate, apply_display_names, leaderboard};
pub use resolution::ScoringEngine;
