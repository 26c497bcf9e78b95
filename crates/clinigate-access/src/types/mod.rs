//! Core domain types shared by the pipeline stages.

pub mod principal;
pub mod region;

pub use principal::{Claims, Principal};
pub use region::{RegionFlags, RegionPolicy};
