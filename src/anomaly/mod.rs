//! Per-city unsupervised outlier flags on the monthly panel.

pub mod detect;
pub mod isolation_forest;

pub use detect::{detect, detect_city};
pub use isolation_forest::{ForestParams, IsolationForest};
