//! Batch co-location of one product against a second product or a whole mission.
//!
//! A [`ColocGenerator`] opens every candidate, evaluates each pair
//! independently (in parallel with the `parallel` feature), writes merged
//! products through a [`ProductSink`] and appends co-located pairs to a
//! listing file. One candidate failing never stops the others.
//!
//! [`ColocGenerator::run_pairs`] does the same for pairs already matched
//! elsewhere: each [`PairRow`] names two granules with their footprints and
//! gets its own status.

use crate::core::intersection::{Intersection, IntersectionOutcome};
use crate::core::merge::ProductBuilder;
use crate::io::acquisition::{Acquisition, AcquisitionFactory, WithFootprint};
use crate::io::config::{ColocConfig, IntersectionSettings};
use crate::io::discovery::{DiscoveryQuery, ProductDiscovery};
use crate::io::mission::Mission;
use crate::io::output::{append_listing_line, NullSink, ProductSink};
use crate::types::{ColocError, ColocResult};
use chrono::{DateTime, Duration, Utc};
use geo::Polygon;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// What product 1 is compared with
#[derive(Debug, Clone, PartialEq)]
pub enum ComparisonTarget {
    Product(PathBuf),
    Mission {
        mission: String,
        input_ds: Option<Vec<PathBuf>>,
        level: Option<u8>,
    },
}

/// Validated co-location request
#[derive(Debug, Clone, PartialEq)]
pub struct ColocRequest {
    pub product1: PathBuf,
    pub target: ComparisonTarget,
    pub listing: bool,
    pub product_generation: bool,
    pub destination_folder: PathBuf,
    pub listing_filename: Option<String>,
    pub product_filename: Option<String>,
}

impl ColocRequest {
    pub fn builder<P: Into<PathBuf>>(product1: P) -> ColocRequestBuilder {
        ColocRequestBuilder::new(product1)
    }
}

#[derive(Debug, Clone)]
pub struct ColocRequestBuilder {
    product1: PathBuf,
    product2: Option<PathBuf>,
    mission: Option<String>,
    input_ds: Option<Vec<PathBuf>>,
    level: Option<u8>,
    listing: bool,
    product_generation: bool,
    destination_folder: PathBuf,
    listing_filename: Option<String>,
    product_filename: Option<String>,
}

impl ColocRequestBuilder {
    pub fn new<P: Into<PathBuf>>(product1: P) -> Self {
        Self {
            product1: product1.into(),
            product2: None,
            mission: None,
            input_ds: None,
            level: None,
            listing: false,
            product_generation: true,
            destination_folder: std::env::temp_dir(),
            listing_filename: None,
            product_filename: None,
        }
    }

    pub fn product2<P: Into<PathBuf>>(mut self, product2: P) -> Self {
        self.product2 = Some(product2.into());
        self
    }

    pub fn mission(mut self, mission: &str) -> Self {
        self.mission = Some(mission.to_string());
        self
    }

    pub fn input_ds<I, P>(mut self, files: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.input_ds = Some(files.into_iter().map(Into::into).collect());
        self
    }

    pub fn level(mut self, level: u8) -> Self {
        self.level = Some(level);
        self
    }

    pub fn listing(mut self, listing: bool) -> Self {
        self.listing = listing;
        self
    }

    pub fn product_generation(mut self, product_generation: bool) -> Self {
        self.product_generation = product_generation;
        self
    }

    pub fn destination_folder<P: Into<PathBuf>>(mut self, folder: P) -> Self {
        self.destination_folder = folder.into();
        self
    }

    pub fn listing_filename(mut self, name: &str) -> Self {
        self.listing_filename = Some(name.to_string());
        self
    }

    pub fn product_filename(mut self, name: &str) -> Self {
        self.product_filename = Some(name.to_string());
        self
    }

    /// Exactly one of a second product or a mission must be given.
    ///
    /// The mission must be a known tag, and an explicit product file name is
    /// only accepted against a single second product.
    pub fn build(self) -> ColocResult<ColocRequest> {
        let target = match (self.product2, self.mission) {
            (Some(product2), None) => ComparisonTarget::Product(product2),
            (None, Some(mission)) => {
                let known = Mission::from_tag(&mission)?;
                if let Some(name) = &self.product_filename {
                    return Err(ColocError::Config(format!(
                        "product file name {} would be shared by every {} candidate",
                        name, known
                    )));
                }
                ComparisonTarget::Mission {
                    mission,
                    input_ds: self.input_ds,
                    level: self.level,
                }
            }
            (Some(_), Some(_)) => {
                return Err(ColocError::Config(
                    "a second product and a mission were both given, choose one".to_string(),
                ))
            }
            (None, None) => {
                return Err(ColocError::Config(
                    "a second product or a mission must be given".to_string(),
                ))
            }
        };
        Ok(ColocRequest {
            product1: self.product1,
            target,
            listing: self.listing,
            product_generation: self.product_generation,
            destination_folder: self.destination_folder,
            listing_filename: self.listing_filename,
            product_filename: self.product_filename,
        })
    }
}

/// Product generation result for a co-located pair
#[derive(Debug, Clone, PartialEq)]
pub enum ProductStatus {
    NotRequested,
    /// At least one side is metadata-only
    Unavailable,
    Written(PathBuf),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum PairStatus {
    /// Candidate could not be opened because it does not exist
    Skipped(String),
    NotColocated,
    Colocated {
        area_km2: Option<f64>,
        product: ProductStatus,
    },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairReport {
    pub candidate: PathBuf,
    pub status: PairStatus,
    /// Listing this pair belongs to, when listing is requested and the pair is co-located
    pub listing: Option<PathBuf>,
}

impl PairReport {
    pub fn is_colocated(&self) -> bool {
        matches!(self.status, PairStatus::Colocated { .. })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColocSummary {
    pub product1: PathBuf,
    pub reports: Vec<PairReport>,
}

impl ColocSummary {
    pub fn has_coloc(&self) -> bool {
        self.reports.iter().any(PairReport::is_colocated)
    }

    pub fn colocated_files(&self) -> Vec<&Path> {
        self.reports
            .iter()
            .filter(|report| report.is_colocated())
            .map(|report| report.candidate.as_path())
            .collect()
    }
}

/// One granule of a pre-matched pair
#[derive(Debug, Clone, PartialEq)]
pub struct RowSide {
    /// Mission tag used to look the granule up
    pub mission: String,
    pub granule: String,
    pub start: DateTime<Utc>,
    pub stop: DateTime<Utc>,
    /// Imposed on the opened product
    pub footprint: Polygon<f64>,
}

/// Pair of granules matched beforehand, e.g. by a catalogue cross-match
#[derive(Debug, Clone, PartialEq)]
pub struct PairRow {
    pub reference: RowSide,
    pub matched: RowSide,
    /// Overrides [`PairRunOptions::destination_folder`]
    pub destination_folder: Option<PathBuf>,
}

impl PairRow {
    fn time_difference(&self) -> Duration {
        let difference = self.reference.start - self.matched.start;
        if difference < Duration::zero() {
            -difference
        } else {
            difference
        }
    }
}

/// Side whose granules must appear at most once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UniqueGranule {
    Reference,
    Matched,
}

/// Keep, for each granule of `side`, the row with the smallest start time difference
pub fn unique_rows(mut rows: Vec<PairRow>, side: UniqueGranule) -> Vec<PairRow> {
    rows.sort_by_key(PairRow::time_difference);
    let mut seen = HashSet::new();
    rows.retain(|row| {
        let granule = match side {
            UniqueGranule::Reference => &row.reference.granule,
            UniqueGranule::Matched => &row.matched.granule,
        };
        seen.insert(granule.clone())
    });
    rows
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairRunOptions {
    /// Used by rows without their own destination
    pub destination_folder: Option<PathBuf>,
    pub product_generation: bool,
    pub listing: bool,
    /// Margin around each granule's dates when searching its file
    pub time_slack: Duration,
    /// Require the file name to contain the granule name; otherwise the first file found is used
    pub match_granule_name: bool,
    pub unique: Option<UniqueGranule>,
}

impl Default for PairRunOptions {
    fn default() -> Self {
        Self {
            destination_folder: None,
            product_generation: true,
            listing: false,
            time_slack: Duration::zero(),
            match_granule_name: true,
            unique: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowStatus {
    /// Both files were opened and the pair evaluated
    Processed { product1: PathBuf, pair: PairReport },
    /// No file found for this granule
    MissingFile(String),
    Failed(String),
}

impl RowStatus {
    /// 0 when processed, 1 on failure, 2 when a file is missing
    pub fn code(&self) -> u8 {
        match self {
            RowStatus::Processed { pair, .. } if matches!(pair.status, PairStatus::Failed(_)) => 1,
            RowStatus::Processed { .. } => 0,
            RowStatus::MissingFile(_) => 2,
            RowStatus::Failed(_) => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RowReport {
    pub reference: String,
    pub matched: String,
    pub destination_folder: PathBuf,
    pub status: RowStatus,
}

impl RowReport {
    /// `coloc_{matched stem}__{reference stem}.status`
    pub fn status_filename(&self) -> String {
        format!(
            "coloc_{}__{}.status",
            product_stem(&self.matched),
            product_stem(&self.reference)
        )
    }
}

/// Listing name tag of an acquisition: its mission tag, else its mission name in upper case
fn mission_tag(acquisition: &dyn Acquisition) -> String {
    Mission::from_product_name(acquisition.product_name())
        .map(|mission| mission.tag().to_string())
        .unwrap_or_else(|_| acquisition.mission_name().to_uppercase())
}

/// `listing_coloc_{MISSION1}_{MISSION2}_{delta}.txt`
pub fn default_listing_filename(first: &dyn Acquisition, second: &dyn Acquisition, delta_minutes: i64) -> String {
    format!(
        "listing_coloc_{}_{}_{}.txt",
        mission_tag(first),
        mission_tag(second),
        delta_minutes
    )
}

fn product_stem(product_name: &str) -> &str {
    product_name.split('.').next().unwrap_or(product_name)
}

/// `sat_coloc_{stem1}__{stem2}.nc`
pub fn default_product_filename(first: &dyn Acquisition, second: &dyn Acquisition) -> String {
    format!(
        "sat_coloc_{}__{}.nc",
        product_stem(first.product_name()),
        product_stem(second.product_name())
    )
}

fn append_to_listing(product1: &Path, report: &PairReport) {
    if let Some(listing) = &report.listing {
        let first = product1.display().to_string();
        let second = report.candidate.display().to_string();
        if let Err(e) = append_listing_line(listing, &first, &second) {
            log::warn!("Cannot update listing {}: {}", listing.display(), e);
        }
    }
}

/// File of `side`'s granule among the mission files around its dates
fn resolve_granule(
    discovery: &dyn ProductDiscovery,
    side: &RowSide,
    options: &PairRunOptions,
) -> ColocResult<Option<PathBuf>> {
    let query = DiscoveryQuery {
        mission: side.mission.clone(),
        start: side.start - options.time_slack,
        stop: side.stop + options.time_slack,
        input_ds: None,
        level: Some(2),
    };
    let files = discovery.find(&query)?;
    let stem = product_stem(&side.granule);
    let named = files
        .iter()
        .find(|file| {
            file.file_name()
                .and_then(|name| name.to_str())
                .map_or(false, |name| name.contains(stem))
        })
        .cloned();
    if named.is_some() || options.match_granule_name {
        return Ok(named);
    }
    Ok(files.into_iter().next())
}

/// Runs co-location requests against the collaborators it was given
pub struct ColocGenerator {
    config: ColocConfig,
    factory: Box<dyn AcquisitionFactory>,
    discovery: Option<Box<dyn ProductDiscovery>>,
    sink: Box<dyn ProductSink>,
}

impl ColocGenerator {
    pub fn new(config: ColocConfig, factory: Box<dyn AcquisitionFactory>) -> ColocResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            factory,
            discovery: None,
            sink: Box::new(NullSink),
        })
    }

    pub fn with_discovery(mut self, discovery: Box<dyn ProductDiscovery>) -> Self {
        self.discovery = Some(discovery);
        self
    }

    pub fn with_sink(mut self, sink: Box<dyn ProductSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &ColocConfig {
        &self.config
    }

    /// Co-locate product 1 with every candidate of the request.
    ///
    /// Configuration problems and an unreadable product 1 are fatal; every
    /// other failure is recorded in the candidate's report.
    pub fn run(&self, request: &ColocRequest) -> ColocResult<ColocSummary> {
        let settings = self.config.intersection_settings(request.product_generation)?;
        log::info!("Opening {}", request.product1.display());
        let product1 = self.factory.open(&request.product1)?;
        let candidates = self.candidates(request, product1.as_ref())?;
        log::info!(
            "{} candidate(s) to co-locate with {}",
            candidates.len(),
            product1.product_name()
        );

        let evaluate = |candidate: &PathBuf| self.evaluate_candidate(request, product1.as_ref(), &settings, candidate);
        #[cfg(feature = "parallel")]
        let reports: Vec<PairReport> = candidates.par_iter().map(evaluate).collect();
        #[cfg(not(feature = "parallel"))]
        let reports: Vec<PairReport> = candidates.iter().map(evaluate).collect();

        // listing writes stay sequential so lines never interleave
        for report in &reports {
            append_to_listing(&request.product1, report);
        }

        Ok(ColocSummary {
            product1: request.product1.clone(),
            reports,
        })
    }

    /// Co-locate pre-matched pairs of granules.
    ///
    /// Product 1 is the matched granule and product 2 the reference one, each
    /// with the footprint given by its row. Missing discovery, an unknown
    /// mission tag or a row without destination folder are fatal; everything
    /// else ends up in the row's status, which is also handed to the sink.
    pub fn run_pairs<I>(&self, rows: I, options: &PairRunOptions) -> ColocResult<Vec<RowReport>>
    where
        I: IntoIterator<Item = PairRow>,
    {
        let discovery = self
            .discovery
            .as_ref()
            .ok_or_else(|| ColocError::Config("no product discovery configured to resolve pair rows".to_string()))?;
        let settings = self.config.intersection_settings(options.product_generation)?;

        let mut rows: Vec<PairRow> = rows.into_iter().collect();
        if let Some(side) = options.unique {
            let total = rows.len();
            rows = unique_rows(rows, side);
            log::info!("{} of {} row(s) kept with unique {:?} granules", rows.len(), total, side);
        }
        let jobs = rows
            .into_iter()
            .map(|row| -> ColocResult<(PairRow, PathBuf)> {
                Mission::from_tag(&row.reference.mission)?;
                Mission::from_tag(&row.matched.mission)?;
                let destination = row
                    .destination_folder
                    .clone()
                    .or_else(|| options.destination_folder.clone())
                    .ok_or_else(|| {
                        ColocError::Config(format!(
                            "no destination folder for {} / {}",
                            row.reference.granule, row.matched.granule
                        ))
                    })?;
                Ok((row, destination))
            })
            .collect::<ColocResult<Vec<_>>>()?;

        let process = |(row, destination): &(PairRow, PathBuf)| {
            self.process_row(discovery.as_ref(), row, destination, options, &settings)
        };
        #[cfg(feature = "parallel")]
        let reports: Vec<RowReport> = jobs.par_iter().map(process).collect();
        #[cfg(not(feature = "parallel"))]
        let reports: Vec<RowReport> = jobs.iter().map(process).collect();

        for report in &reports {
            if let RowStatus::Processed { product1, pair } = &report.status {
                append_to_listing(product1, pair);
            }
            let path = report.destination_folder.join(report.status_filename());
            if let Err(e) = self.sink.write_status(report, &path) {
                log::warn!("Cannot write status {}: {}", path.display(), e);
            }
        }
        Ok(reports)
    }

    fn process_row(
        &self,
        discovery: &dyn ProductDiscovery,
        row: &PairRow,
        destination: &Path,
        options: &PairRunOptions,
        settings: &IntersectionSettings,
    ) -> RowReport {
        let report = |status: RowStatus| RowReport {
            reference: row.reference.granule.clone(),
            matched: row.matched.granule.clone(),
            destination_folder: destination.to_path_buf(),
            status,
        };
        log::info!("Process {} and {}", row.reference.granule, row.matched.granule);

        let mut files = Vec::with_capacity(2);
        for side in [&row.matched, &row.reference] {
            match resolve_granule(discovery, side, options) {
                Ok(Some(file)) => {
                    log::info!("Found file {}", file.display());
                    files.push(file);
                }
                Ok(None) => {
                    log::warn!("File {} not found", side.granule);
                    return report(RowStatus::MissingFile(side.granule.clone()));
                }
                Err(e) => return report(RowStatus::Failed(e.to_string())),
            }
        }
        let (matched_file, reference_file) = (&files[0], &files[1]);

        let mut opened = Vec::with_capacity(2);
        for (file, side) in [(matched_file, &row.matched), (reference_file, &row.reference)] {
            match self.factory.open(file) {
                Ok(acquisition) => opened.push(WithFootprint::new(acquisition, side.footprint.clone())),
                Err(ColocError::NotFound(reason)) => return report(RowStatus::MissingFile(reason)),
                Err(e) => {
                    log::warn!("Cannot open {}: {}", file.display(), e);
                    return report(RowStatus::Failed(e.to_string()));
                }
            }
        }

        let request = ColocRequest {
            product1: matched_file.clone(),
            target: ComparisonTarget::Product(reference_file.clone()),
            listing: options.listing,
            product_generation: options.product_generation,
            destination_folder: destination.to_path_buf(),
            listing_filename: None,
            product_filename: None,
        };
        let pair = self.evaluate_pair(&request, &opened[0], &opened[1], settings, reference_file);
        report(RowStatus::Processed {
            product1: matched_file.clone(),
            pair,
        })
    }

    fn candidates(&self, request: &ColocRequest, product1: &dyn Acquisition) -> ColocResult<Vec<PathBuf>> {
        match &request.target {
            ComparisonTarget::Product(product2) => Ok(vec![product2.clone()]),
            ComparisonTarget::Mission {
                mission,
                input_ds,
                level,
            } => {
                let discovery = self.discovery.as_ref().ok_or_else(|| {
                    ColocError::Config(format!("no product discovery configured to search mission {}", mission))
                })?;
                let window = product1.window().widened(self.config.delta());
                let query = DiscoveryQuery {
                    mission: mission.clone(),
                    start: window.start,
                    stop: window.stop,
                    input_ds: input_ds.clone(),
                    level: *level,
                };
                let mut files = discovery.find(&query)?;
                files.retain(|file| file != &request.product1);
                Ok(files)
            }
        }
    }

    fn evaluate_candidate(
        &self,
        request: &ColocRequest,
        product1: &dyn Acquisition,
        settings: &IntersectionSettings,
        candidate: &Path,
    ) -> PairReport {
        let report = |status: PairStatus, listing: Option<PathBuf>| PairReport {
            candidate: candidate.to_path_buf(),
            status,
            listing,
        };

        let product2 = match self.factory.open(candidate) {
            Ok(product2) => product2,
            Err(ColocError::NotFound(reason)) => {
                log::debug!("Skipping {}: {}", candidate.display(), reason);
                return report(PairStatus::Skipped(reason), None);
            }
            Err(e) => {
                log::warn!("Cannot open {}: {}", candidate.display(), e);
                return report(PairStatus::Failed(e.to_string()), None);
            }
        };
        self.evaluate_pair(request, product1, product2.as_ref(), settings, candidate)
    }

    fn evaluate_pair(
        &self,
        request: &ColocRequest,
        product1: &dyn Acquisition,
        product2: &dyn Acquisition,
        settings: &IntersectionSettings,
        candidate: &Path,
    ) -> PairReport {
        let report = |status: PairStatus, listing: Option<PathBuf>| PairReport {
            candidate: candidate.to_path_buf(),
            status,
            listing,
        };

        let outcome = Intersection::new(product1, product2, settings.clone())
            .and_then(|intersection| {
                let outcome = intersection.evaluate()?;
                let product = match &outcome {
                    IntersectionOutcome::Accepted(_) => self.generate_product(request, &intersection, &outcome),
                    _ => ProductStatus::NotRequested,
                };
                Ok((outcome, product))
            });

        match outcome {
            Ok((IntersectionOutcome::Accepted(colocation), product)) => {
                let listing = request.listing.then(|| {
                    let name = request.listing_filename.clone().unwrap_or_else(|| {
                        default_listing_filename(product1, product2, self.config.delta_time)
                    });
                    request.destination_folder.join(name)
                });
                report(
                    PairStatus::Colocated {
                        area_km2: colocation.area_km2,
                        product,
                    },
                    listing,
                )
            }
            Ok((IntersectionOutcome::Unsupported { first, second }, _)) => {
                let e = ColocError::UnsupportedCombination { first, second };
                log::warn!("{} / {}: {}", product1.product_name(), product2.product_name(), e);
                report(PairStatus::Failed(e.to_string()), None)
            }
            Ok(_) => report(PairStatus::NotColocated, None),
            Err(e) => {
                log::warn!(
                    "Co-location of {} with {} failed: {}",
                    product1.product_name(),
                    product2.product_name(),
                    e
                );
                report(PairStatus::Failed(e.to_string()), None)
            }
        }
    }

    fn generate_product(
        &self,
        request: &ColocRequest,
        intersection: &Intersection<'_>,
        outcome: &IntersectionOutcome,
    ) -> ProductStatus {
        if !request.product_generation {
            return ProductStatus::NotRequested;
        }
        let (first, second) = (intersection.first(), intersection.second());
        if first.dataset().is_none() || second.dataset().is_none() {
            log::info!(
                "No product for {} / {}: metadata-only acquisition",
                first.product_name(),
                second.product_name()
            );
            return ProductStatus::Unavailable;
        }

        let name = request
            .product_filename
            .clone()
            .unwrap_or_else(|| default_product_filename(first.source(), second.source()));
        let path = request.destination_folder.join(name);
        let written = ProductBuilder::new(&self.config)
            .build_from_outcome(intersection, outcome)
            .and_then(|product| self.sink.write(&product, &path));
        match written {
            Ok(()) => {
                log::info!("Co-location product written to {}", path.display());
                ProductStatus::Written(path)
            }
            Err(e) => {
                log::warn!(
                    "Product generation for {} / {} failed: {}",
                    first.product_name(),
                    second.product_name(),
                    e
                );
                ProductStatus::Failed(e.to_string())
            }
        }
    }
}
