//! Reservoir-based spatio-temporal importance resampling of scene lights.
//!
//! - [`Cdf`] - distribution over light contribution weights
//! - [`LightBagEntry`] - stratified per-cell light subsets
//! - [`Reservoir`] - streaming weighted reservoir and its reuse rules
//! - [`ReSTIRSampler`] - the per-frame state machine

mod cdf;
pub mod light_bag;
pub mod reservoir;
mod sampler;

pub use cdf::Cdf;
pub use light_bag::LightBagEntry;
pub use reservoir::{LightSample, Reservoir};
pub use sampler::{ReSTIRSampler, SamplerInputs, RAY_EPSILON};
