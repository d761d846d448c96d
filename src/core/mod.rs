//! Core co-location stages

pub mod coloc;
pub mod common_zone;
pub mod geometry;
pub mod intersection;
pub mod merge;
pub mod rasterize;
pub mod resample;
pub mod selection;
pub mod statistics;

// Re-export main types
pub use coloc::{
    ColocGenerator, ColocRequest, ColocRequestBuilder, ColocSummary, PairReport, PairRow, PairRunOptions, PairStatus,
    ProductStatus, RowReport, RowSide, RowStatus,
};
pub use common_zone::{extract_common_zone, CommonZonePair};
pub use geometry::{polygon_area_km2, LongitudeFrame};
pub use intersection::{Colocation, Intersection, IntersectionOutcome};
pub use merge::{MergedProduct, ProductBuilder};
pub use resample::{coloc_resample, normalize_longitudes, ResampledPair};
pub use statistics::{wind_statistics, WindStatistics};
