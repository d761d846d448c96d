//! coloc-sat: co-location of satellite and model wind acquisitions
//!
//! Given two acquisitions (SAR, radiometers, scatterometers or model
//! grids), this library decides whether they observe the same area at
//! nearly the same time and, when they do, resamples both onto a common
//! grid, crops them to their shared footprint and merges them into one
//! record carrying wind comparison statistics.

pub mod core;
pub mod dataset;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use crate::core::{
    ColocGenerator, ColocRequest, Colocation, Intersection, IntersectionOutcome, MergedProduct, ProductBuilder,
    WindStatistics,
};
pub use dataset::{AttrValue, Dataset, Mask, Variable};
pub use io::{Acquisition, AcquisitionFactory, AcquisitionRecord, ColocConfig, Mission};
pub use types::{AcquisitionKind, ColocError, ColocResult, Slot, TimeWindow};
