//! Per-city seasonal forecasts with 95% intervals.

pub mod forecaster;
pub mod sarima;

pub use forecaster::{forecast, forecast_city};
pub use sarima::{SarimaModel, SarimaOrder};
