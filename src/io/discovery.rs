//! Candidate lookup for a mission around a time window.

use crate::types::ColocResult;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Files wanted from the discovery collaborator
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveryQuery {
    pub mission: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    /// Explicit subset of files to search in, when the caller has one
    pub input_ds: Option<Vec<PathBuf>>,
    /// Product level, only meaningful for SAR
    pub level: Option<u8>,
}

/// Lists product files of a mission.
///
/// Results are expected to be roughly time-filtered already; each candidate
/// is checked precisely against its own acquisition dates afterwards.
pub trait ProductDiscovery: Send + Sync {
    fn find(&self, query: &DiscoveryQuery) -> ColocResult<Vec<PathBuf>>;
}

/// Discovery over a fixed list of files, used when the caller already has the candidates
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    files: Vec<PathBuf>,
}

impl StaticDiscovery {
    pub fn new<I, P>(files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        Self {
            files: files.into_iter().map(Into::into).collect(),
        }
    }
}

impl ProductDiscovery for StaticDiscovery {
    fn find(&self, query: &DiscoveryQuery) -> ColocResult<Vec<PathBuf>> {
        let files = match &query.input_ds {
            Some(subset) => self
                .files
                .iter()
                .filter(|file| subset.contains(file))
                .cloned()
                .collect(),
            None => self.files.clone(),
        };
        log::debug!("{} candidate(s) for mission {}", files.len(), query.mission);
        Ok(files)
    }
}
