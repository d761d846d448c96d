//! Mission classification from product file names.

use crate::types::{AcquisitionKind, ColocError, ColocResult};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

/// Supported missions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mission {
    Sar,
    Smos,
    WindSat,
    Smap,
    Hy2,
    Ascat,
    Era5,
}

fn patterns() -> &'static Vec<(Mission, Regex)> {
    static PATTERNS: OnceLock<Vec<(Mission, Regex)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        // Order matters: the first matching pattern wins
        [
            (Mission::Sar, r"^(?:RS2|S1A|S1B|RCM1|RCM2|RCM3)(?:[_-]|$)"),
            (Mission::Smos, r"^SM_"),
            (Mission::WindSat, r"^WSAT_"),
            (Mission::Smap, r"^[^_]*_SMAP(?:_|$)"),
            (Mission::Hy2, r"^[^_]*_[^_]*_[^_]*_HY(?:_|$)"),
            (Mission::Ascat, r"^ASCAT"),
            (Mission::Era5, r"^ERA_5"),
        ]
        .into_iter()
        .filter_map(|(mission, pattern)| Regex::new(pattern).ok().map(|re| (mission, re)))
        .collect()
    })
}

impl Mission {
    /// Classify a product from its file name alone, before any decoding
    pub fn from_product_name<P: AsRef<Path>>(product: P) -> ColocResult<Self> {
        let path = product.as_ref();
        let basename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| ColocError::Config(format!("invalid product path {}", path.display())))?;
        let basename = basename.to_uppercase();

        patterns()
            .iter()
            .find(|(_, re)| re.is_match(&basename))
            .map(|(mission, _)| *mission)
            .ok_or_else(|| {
                ColocError::Config(format!("unrecognized product name {}", path.display()))
            })
    }

    pub fn from_tag(tag: &str) -> ColocResult<Self> {
        match tag.to_uppercase().as_str() {
            "SAR" | "S1" | "RS2" | "RCM" => Ok(Mission::Sar),
            "SMOS" => Ok(Mission::Smos),
            "WINDSAT" => Ok(Mission::WindSat),
            "SMAP" => Ok(Mission::Smap),
            "HY2" => Ok(Mission::Hy2),
            "ASCAT" => Ok(Mission::Ascat),
            "ERA5" => Ok(Mission::Era5),
            other => Err(ColocError::Config(format!("unknown mission {}", other))),
        }
    }

    /// Short upper-case tag used in listing file names
    pub fn tag(&self) -> &'static str {
        match self {
            Mission::Sar => "SAR",
            Mission::Smos => "SMOS",
            Mission::WindSat => "WINDSAT",
            Mission::Smap => "SMAP",
            Mission::Hy2 => "HY2",
            Mission::Ascat => "ASCAT",
            Mission::Era5 => "ERA5",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Mission::Sar => "SAR",
            Mission::Smos => "SMOS",
            Mission::WindSat => "WindSat",
            Mission::Smap => "SMAP",
            Mission::Hy2 => "HY2",
            Mission::Ascat => "ASCAT",
            Mission::Era5 => "ERA5",
        }
    }

    pub fn acquisition_kind(&self) -> AcquisitionKind {
        match self {
            Mission::Sar => AcquisitionKind::TruncatedSwath,
            Mission::Smos | Mission::WindSat | Mission::Smap => AcquisitionKind::DailyRegularGrid,
            Mission::Hy2 | Mission::Ascat => AcquisitionKind::Swath,
            Mission::Era5 => AcquisitionKind::ModelRegularGrid,
        }
    }
}

impl std::fmt::Display for Mission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}
