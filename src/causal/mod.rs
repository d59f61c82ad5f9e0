//! Causal estimation of an intervention effect on the monthly panel.

pub mod did;
pub mod fixed_effects;

pub use did::{DidPanel, estimate, prepare};
pub use fixed_effects::FixedEffectsSolver;
