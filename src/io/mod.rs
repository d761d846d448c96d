//! Inputs and outputs: the acquisition contract, configuration, discovery and listings

pub mod acquisition;
pub mod config;
pub mod discovery;
pub mod mission;
pub mod output;

pub use acquisition::{reformat_meta, Acquisition, AcquisitionFactory, AcquisitionRecord, PreparedAcquisition, WithFootprint};
pub use config::{CanonicalVar, ColocConfig, CommonVarNames, IntersectionSettings, ResamplingMethod};
pub use discovery::{DiscoveryQuery, ProductDiscovery, StaticDiscovery};
pub use mission::Mission;
pub use output::{append_listing_line, write_status_file, NullSink, ProductSink};
