//! The capability set every sensor reader provides, and the prepared views
//! the intersection engine works on.

use crate::core::geometry::footprint_from_dataset;
use crate::dataset::Dataset;
use crate::io::config::{CanonicalVar, CommonVarNames};
use crate::types::{AcquisitionKind, ColocError, ColocResult, TimeWindow};
use chrono::{DateTime, Utc};
use geo::Polygon;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::path::Path;

/// One opened sensor product.
///
/// Implemented by per-mission readers. Every accessor is cheap; the grid is
/// only handed out by reference.
pub trait Acquisition: Send + Sync {
    fn product_name(&self) -> &str;
    fn mission_name(&self) -> &str;
    fn acquisition_kind(&self) -> AcquisitionKind;
    fn start_date(&self) -> DateTime<Utc>;
    fn stop_date(&self) -> DateTime<Utc>;
    fn longitude_name(&self) -> &str;
    fn latitude_name(&self) -> &str;
    fn time_name(&self) -> &str;
    /// Primary comparison variable
    fn wind_name(&self) -> &str;

    /// Grid of the product, `None` for metadata-only products (SAR Level-1)
    fn dataset(&self) -> Option<&Dataset>;

    fn orbit_segment_name(&self) -> Option<&str> {
        None
    }

    fn has_orbit_segmentation(&self) -> bool {
        self.orbit_segment_name().is_some()
    }

    /// Footprint read from product metadata, when the product carries one
    fn explicit_footprint(&self) -> Option<&Polygon<f64>> {
        None
    }

    fn footprint(&self) -> ColocResult<Polygon<f64>> {
        if let Some(footprint) = self.explicit_footprint() {
            return Ok(footprint.clone());
        }
        let dataset = self
            .dataset()
            .ok_or_else(|| ColocError::MissingDataset(self.product_name().to_string()))?;
        footprint_from_dataset(
            dataset,
            self.longitude_name(),
            self.latitude_name(),
            self.time_name(),
            None,
        )
    }

    fn window(&self) -> TimeWindow {
        TimeWindow {
            start: self.start_date(),
            stop: self.stop_date(),
        }
    }

    fn unnecessary_vars_in_coloc_product(&self) -> Vec<String> {
        vec![self.time_name().to_string()]
    }

    fn necessary_attrs_in_coloc_product(&self) -> Vec<String> {
        Vec::new()
    }

    fn rename_attrs_in_coloc_product(&self, attr: &str) -> String {
        attr.to_string()
    }

    fn rename_vars_in_coloc(&self, dataset: Dataset, _names: &CommonVarNames) -> Dataset {
        dataset
    }
}

/// Opens acquisitions from paths
pub trait AcquisitionFactory: Send + Sync {
    /// Fails with [`ColocError::NotFound`] for missing inputs; decode errors are propagated as is
    fn open(&self, path: &Path) -> ColocResult<Box<dyn Acquisition>>;
}

/// Concrete acquisition filled in by readers
#[derive(Debug, Clone)]
pub struct AcquisitionRecord {
    product_name: String,
    mission_name: String,
    kind: AcquisitionKind,
    window: TimeWindow,
    longitude_name: String,
    latitude_name: String,
    time_name: String,
    wind_name: String,
    orbit_segment_name: Option<String>,
    dataset: Option<Dataset>,
    footprint: Option<Polygon<f64>>,
    unnecessary_vars: Vec<String>,
    necessary_attrs: Vec<String>,
    attr_renames: BTreeMap<String, String>,
    var_renames: BTreeMap<String, CanonicalVar>,
}

impl AcquisitionRecord {
    pub fn new(
        product_name: &str,
        mission_name: &str,
        kind: AcquisitionKind,
        start: DateTime<Utc>,
        stop: DateTime<Utc>,
    ) -> ColocResult<Self> {
        let window = TimeWindow::new(start, stop)?;
        Ok(Self {
            product_name: product_name.to_string(),
            mission_name: mission_name.to_string(),
            kind,
            window,
            longitude_name: "lon".to_string(),
            latitude_name: "lat".to_string(),
            time_name: "time".to_string(),
            wind_name: "wind_speed".to_string(),
            orbit_segment_name: None,
            dataset: None,
            footprint: None,
            unnecessary_vars: vec!["time".to_string()],
            necessary_attrs: Vec::new(),
            attr_renames: BTreeMap::new(),
            var_renames: BTreeMap::new(),
        })
    }

    /// Record whose start/stop dates are the extreme finite values of its time variable
    pub fn from_dataset(
        product_name: &str,
        mission_name: &str,
        kind: AcquisitionKind,
        dataset: Dataset,
        time_name: &str,
    ) -> ColocResult<Self> {
        let time = dataset.require(time_name)?;
        let start = time.finite_min().and_then(crate::types::datetime_from_seconds);
        let stop = time.finite_max().and_then(crate::types::datetime_from_seconds);
        let (start, stop) = match (start, stop) {
            (Some(start), Some(stop)) => (start, stop),
            _ => {
                return Err(ColocError::InvalidAcquisition(format!(
                    "{} has no valid time value",
                    product_name
                )))
            }
        };
        let record = Self::new(product_name, mission_name, kind, start, stop)?;
        Ok(record.with_time_name(time_name).with_dataset(dataset))
    }

    pub fn with_dataset(mut self, dataset: Dataset) -> Self {
        self.dataset = Some(dataset);
        self
    }

    pub fn with_footprint(mut self, footprint: Polygon<f64>) -> Self {
        self.footprint = Some(footprint);
        self
    }

    pub fn with_coordinate_names(mut self, longitude: &str, latitude: &str) -> Self {
        self.longitude_name = longitude.to_string();
        self.latitude_name = latitude.to_string();
        self
    }

    /// Also updates the default list of variables dropped from products
    pub fn with_time_name(mut self, time_name: &str) -> Self {
        for var in self.unnecessary_vars.iter_mut() {
            if *var == self.time_name {
                *var = time_name.to_string();
            }
        }
        self.time_name = time_name.to_string();
        self
    }

    pub fn with_wind_name(mut self, wind_name: &str) -> Self {
        self.wind_name = wind_name.to_string();
        self
    }

    pub fn with_orbit_segment(mut self, orbit_segment_name: &str) -> Self {
        self.orbit_segment_name = Some(orbit_segment_name.to_string());
        self
    }

    pub fn with_unnecessary_vars(mut self, vars: &[&str]) -> Self {
        self.unnecessary_vars = vars.iter().map(|v| v.to_string()).collect();
        self
    }

    pub fn with_necessary_attrs(mut self, attrs: &[&str]) -> Self {
        self.necessary_attrs = attrs.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn with_attr_rename(mut self, attr: &str, renamed: &str) -> Self {
        self.attr_renames.insert(attr.to_string(), renamed.to_string());
        self
    }

    pub fn with_var_rename(mut self, var: &str, canonical: CanonicalVar) -> Self {
        self.var_renames.insert(var.to_string(), canonical);
        self
    }
}

impl Acquisition for AcquisitionRecord {
    fn product_name(&self) -> &str {
        &self.product_name
    }

    fn mission_name(&self) -> &str {
        &self.mission_name
    }

    fn acquisition_kind(&self) -> AcquisitionKind {
        self.kind
    }

    fn start_date(&self) -> DateTime<Utc> {
        self.window.start
    }

    fn stop_date(&self) -> DateTime<Utc> {
        self.window.stop
    }

    fn longitude_name(&self) -> &str {
        &self.longitude_name
    }

    fn latitude_name(&self) -> &str {
        &self.latitude_name
    }

    fn time_name(&self) -> &str {
        &self.time_name
    }

    fn wind_name(&self) -> &str {
        &self.wind_name
    }

    fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_ref()
    }

    fn orbit_segment_name(&self) -> Option<&str> {
        self.orbit_segment_name.as_deref()
    }

    fn explicit_footprint(&self) -> Option<&Polygon<f64>> {
        self.footprint.as_ref()
    }

    fn unnecessary_vars_in_coloc_product(&self) -> Vec<String> {
        self.unnecessary_vars.clone()
    }

    fn necessary_attrs_in_coloc_product(&self) -> Vec<String> {
        self.necessary_attrs.clone()
    }

    fn rename_attrs_in_coloc_product(&self, attr: &str) -> String {
        self.attr_renames
            .get(attr)
            .cloned()
            .unwrap_or_else(|| attr.to_string())
    }

    fn rename_vars_in_coloc(&self, mut dataset: Dataset, names: &CommonVarNames) -> Dataset {
        for (var, canonical) in &self.var_renames {
            if dataset.contains(var) {
                dataset = dataset.rename(var, names.name(*canonical));
            }
        }
        dataset
    }
}

/// Opened acquisition whose footprint is imposed by the caller instead of read from the product
pub struct WithFootprint {
    inner: Box<dyn Acquisition>,
    footprint: Polygon<f64>,
}

impl WithFootprint {
    pub fn new(inner: Box<dyn Acquisition>, footprint: Polygon<f64>) -> Self {
        Self { inner, footprint }
    }
}

impl Acquisition for WithFootprint {
    fn product_name(&self) -> &str {
        self.inner.product_name()
    }

    fn mission_name(&self) -> &str {
        self.inner.mission_name()
    }

    fn acquisition_kind(&self) -> AcquisitionKind {
        self.inner.acquisition_kind()
    }

    fn start_date(&self) -> DateTime<Utc> {
        self.inner.start_date()
    }

    fn stop_date(&self) -> DateTime<Utc> {
        self.inner.stop_date()
    }

    fn longitude_name(&self) -> &str {
        self.inner.longitude_name()
    }

    fn latitude_name(&self) -> &str {
        self.inner.latitude_name()
    }

    fn time_name(&self) -> &str {
        self.inner.time_name()
    }

    fn wind_name(&self) -> &str {
        self.inner.wind_name()
    }

    fn dataset(&self) -> Option<&Dataset> {
        self.inner.dataset()
    }

    fn orbit_segment_name(&self) -> Option<&str> {
        self.inner.orbit_segment_name()
    }

    fn explicit_footprint(&self) -> Option<&Polygon<f64>> {
        Some(&self.footprint)
    }

    fn unnecessary_vars_in_coloc_product(&self) -> Vec<String> {
        self.inner.unnecessary_vars_in_coloc_product()
    }

    fn necessary_attrs_in_coloc_product(&self) -> Vec<String> {
        self.inner.necessary_attrs_in_coloc_product()
    }

    fn rename_attrs_in_coloc_product(&self, attr: &str) -> String {
        self.inner.rename_attrs_in_coloc_product(attr)
    }

    fn rename_vars_in_coloc(&self, dataset: Dataset, names: &CommonVarNames) -> Dataset {
        self.inner.rename_vars_in_coloc(dataset, names)
    }
}

/// Acquisition view with canonical coordinate names, optionally narrowed to one orbit segment.
///
/// The source acquisition is never mutated; renamed or narrowed grids are owned by the view.
#[derive(Clone)]
pub struct PreparedAcquisition<'a> {
    source: &'a dyn Acquisition,
    dataset: Option<Cow<'a, Dataset>>,
    longitude_name: String,
    latitude_name: String,
    segment: Option<usize>,
}

impl std::fmt::Debug for PreparedAcquisition<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedAcquisition")
            .field("product_name", &self.source.product_name())
            .field("kind", &self.source.acquisition_kind())
            .field("segment", &self.segment)
            .finish()
    }
}

/// Rename longitude/latitude to the canonical names; metadata-only products pass through
pub fn reformat_meta<'a>(
    acquisition: &'a dyn Acquisition,
    names: &CommonVarNames,
) -> ColocResult<PreparedAcquisition<'a>> {
    let dataset = match acquisition.dataset() {
        None => {
            return Ok(PreparedAcquisition {
                source: acquisition,
                dataset: None,
                longitude_name: acquisition.longitude_name().to_string(),
                latitude_name: acquisition.latitude_name().to_string(),
                segment: None,
            })
        }
        Some(dataset) => dataset,
    };

    let lon_renamed = acquisition.longitude_name() != names.longitude;
    let lat_renamed = acquisition.latitude_name() != names.latitude;
    let dataset = if lon_renamed || lat_renamed {
        log::debug!(
            "Renaming coordinates of {} to {}/{}",
            acquisition.product_name(),
            names.longitude,
            names.latitude
        );
        let mut owned = dataset.clone();
        if lon_renamed {
            owned = owned.rename(acquisition.longitude_name(), &names.longitude);
        }
        if lat_renamed {
            owned = owned.rename(acquisition.latitude_name(), &names.latitude);
        }
        Cow::Owned(owned)
    } else {
        Cow::Borrowed(dataset)
    };

    Ok(PreparedAcquisition {
        source: acquisition,
        dataset: Some(dataset),
        longitude_name: names.longitude.clone(),
        latitude_name: names.latitude.clone(),
        segment: None,
    })
}

impl<'a> PreparedAcquisition<'a> {
    pub fn source(&self) -> &'a dyn Acquisition {
        self.source
    }

    pub fn product_name(&self) -> &str {
        self.source.product_name()
    }

    pub fn mission_name(&self) -> &str {
        self.source.mission_name()
    }

    pub fn kind(&self) -> AcquisitionKind {
        self.source.acquisition_kind()
    }

    pub fn window(&self) -> TimeWindow {
        self.source.window()
    }

    pub fn longitude_name(&self) -> &str {
        &self.longitude_name
    }

    pub fn latitude_name(&self) -> &str {
        &self.latitude_name
    }

    pub fn time_name(&self) -> &str {
        self.source.time_name()
    }

    pub fn wind_name(&self) -> &str {
        self.source.wind_name()
    }

    /// Orbit dimension of the grid, `None` once narrowed to a single segment
    pub fn orbit_segment_name(&self) -> Option<&str> {
        match self.segment {
            Some(_) => None,
            None => self.source.orbit_segment_name(),
        }
    }

    pub fn has_orbit_segmentation(&self) -> bool {
        self.source.has_orbit_segmentation()
    }

    pub fn segment(&self) -> Option<usize> {
        self.segment
    }

    pub fn dataset(&self) -> Option<&Dataset> {
        self.dataset.as_deref()
    }

    pub fn require_dataset(&self) -> ColocResult<&Dataset> {
        self.dataset()
            .ok_or_else(|| ColocError::MissingDataset(self.product_name().to_string()))
    }

    /// Explicit footprint when the product has one, else the convex hull of its grid
    pub fn footprint(&self) -> ColocResult<Polygon<f64>> {
        if let Some(footprint) = self.source.explicit_footprint() {
            return Ok(footprint.clone());
        }
        footprint_from_dataset(
            self.require_dataset()?,
            &self.longitude_name,
            &self.latitude_name,
            self.time_name(),
            None,
        )
    }

    pub fn segment_count(&self) -> ColocResult<usize> {
        match self.orbit_segment_name() {
            Some(orbit) => self.require_dataset()?.dim_len(orbit),
            None => Ok(1),
        }
    }

    /// View restricted to one orbit segment
    pub fn narrow_to_segment(&self, index: usize) -> ColocResult<PreparedAcquisition<'a>> {
        let orbit = self.orbit_segment_name().ok_or_else(|| {
            ColocError::Processing(format!(
                "{} has no orbit segmentation to narrow",
                self.product_name()
            ))
        })?;
        let narrowed = self.require_dataset()?.isel(orbit, index)?;
        Ok(PreparedAcquisition {
            source: self.source,
            dataset: Some(Cow::Owned(narrowed)),
            longitude_name: self.longitude_name.clone(),
            latitude_name: self.latitude_name.clone(),
            segment: Some(index),
        })
    }

    pub fn unnecessary_vars_in_coloc_product(&self) -> Vec<String> {
        self.source.unnecessary_vars_in_coloc_product()
    }

    pub fn necessary_attrs_in_coloc_product(&self) -> Vec<String> {
        self.source.necessary_attrs_in_coloc_product()
    }

    pub fn rename_attrs_in_coloc_product(&self, attr: &str) -> String {
        self.source.rename_attrs_in_coloc_product(attr)
    }

    pub fn rename_vars_in_coloc(&self, dataset: Dataset, names: &CommonVarNames) -> Dataset {
        self.source.rename_vars_in_coloc(dataset, names)
    }
}
