//! Process configuration shared by the mobile operator crates: executor
//! run settings and the tracing bootstrap.

pub mod logging;
pub mod settings;

pub use logging::{flush_chrome_trace, init_tracing, InitError};
pub use settings::{lock_reduction_order, rng_from_optional, ReductionOrder, RunSettings};
