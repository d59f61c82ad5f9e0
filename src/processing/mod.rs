//! Monthly panel construction.
//!
//! [`align`] turns irregular readings into gap-free monthly series per city;
//! [`aggregate`] builds named indicator tables and joins them.

pub mod aggregate;
pub mod align;
pub mod fill;
pub mod utility;

pub use aggregate::{IndicatorRow, IndicatorTable, aggregate, merge};
pub use align::{AlignOptions, align};
pub use fill::FillMethod;
