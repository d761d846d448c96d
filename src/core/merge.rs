//! Formatting and merging of two common-zone datasets into one co-location product.

use crate::core::common_zone::{extract_common_zone, CommonZonePair};
use crate::core::geometry::{footprint_from_dataset, multipolygon_area_km2, parse_polygonal_wkt, to_wkt};
use crate::core::intersection::{Colocation, Intersection, IntersectionOutcome};
use crate::core::resample::coloc_resample;
use crate::core::selection::common_points_mask;
use crate::core::statistics::{wind_statistics, WindStatistics};
use crate::dataset::{union_dims, AttrValue, Dataset};
use crate::io::acquisition::PreparedAcquisition;
use crate::io::config::{ColocConfig, CommonVarNames, ResamplingMethod};
use crate::types::{datetime_from_seconds, AcquisitionKind, ColocError, ColocResult, Slot, TimeWindow};
use chrono::Duration;
use geo::{BooleanOps, Geometry, MultiPolygon};
use std::collections::BTreeMap;

/// Text layout of the measurement start/stop attributes
pub const MEASUREMENT_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Merged co-location record with typed copies of its derived attributes
#[derive(Debug, Clone)]
pub struct MergedProduct {
    pub dataset: Dataset,
    /// Distance between the midpoints of both measurement windows
    pub time_difference: Duration,
    /// Intersection of both footprints after cropping
    pub common_zone: MultiPolygon<f64>,
    pub area_km2: f64,
    /// `None` when either side lacks the canonical wind speed
    pub statistics: Option<WindStatistics>,
}

/// One side after attribute and variable formatting
struct FormattedSide {
    dataset: Dataset,
    measurement: TimeWindow,
}

/// Builds merged products from accepted intersections
#[derive(Debug, Clone)]
pub struct ProductBuilder {
    resampling: ResamplingMethod,
    common_var_names: CommonVarNames,
}

impl ProductBuilder {
    pub fn new(config: &ColocConfig) -> Self {
        Self {
            resampling: config.resampling,
            common_var_names: config.common_var_names.clone(),
        }
    }

    pub fn with_resampling(mut self, method: ResamplingMethod) -> Self {
        self.resampling = method;
        self
    }

    /// Merge an evaluated pair; only accepted outcomes produce a product
    pub fn build_from_outcome(
        &self,
        intersection: &Intersection<'_>,
        outcome: &IntersectionOutcome,
    ) -> ColocResult<MergedProduct> {
        match outcome {
            IntersectionOutcome::Accepted(colocation) => self.build(intersection, colocation),
            IntersectionOutcome::Unsupported { first, second } => Err(ColocError::UnsupportedCombination {
                first: *first,
                second: *second,
            }),
            _ => Err(ColocError::Processing(format!(
                "{} and {} are not co-located",
                intersection.first().product_name(),
                intersection.second().product_name()
            ))),
        }
    }

    /// Resample, crop to the common zone, then merge
    pub fn build(&self, intersection: &Intersection<'_>, colocation: &Colocation) -> ColocResult<MergedProduct> {
        let resampled = coloc_resample(intersection, colocation, self.resampling)?;
        let zones = extract_common_zone(intersection, colocation, &resampled)?;
        self.merge_common_zones(intersection, &colocation.window, &zones)
    }

    /// Format both common-zone datasets and merge them with derived attributes
    pub fn merge_common_zones(
        &self,
        intersection: &Intersection<'_>,
        window: &TimeWindow,
        zones: &CommonZonePair,
    ) -> ColocResult<MergedProduct> {
        log::info!("Starting merging datasets");
        for slot in [Slot::First, Slot::Second] {
            let dataset = zones.dataset(slot);
            if dataset.are_dimensions_empty() || dataset.has_empty_dimension() {
                log::warn!(
                    "Empty common zone for {}",
                    intersection.acquisition(slot).product_name()
                );
                return Err(ColocError::NotEnoughCommonPoints);
            }
        }

        let first = self.format_side(intersection.first(), zones.dataset(Slot::First), window)?;
        let second = self.format_side(intersection.second(), zones.dataset(Slot::Second), window)?;
        let (ds1, ds2) = common_points_mask(&first.dataset, &second.dataset)?;
        let ds1 = with_suffix(ds1, Slot::First);
        let ds2 = with_suffix(ds2, Slot::Second);

        let time_difference = (first.measurement.midpoint() - second.measurement.midpoint()).abs();
        let common_zone = footprint_intersection(&ds1, &ds2)?;
        let area_km2 = multipolygon_area_km2(&common_zone)?;

        let mut dataset = ds1.merge_override(&ds2);
        dataset
            .attrs
            .insert("time_difference".to_string(), AttrValue::from(time_difference.to_string()));
        dataset.attrs.insert(
            "polygon_common_zone".to_string(),
            AttrValue::from(common_zone_wkt(&common_zone)),
        );
        dataset
            .attrs
            .insert("area_intersection".to_string(), AttrValue::Float(area_km2));
        dataset
            .attrs
            .insert("version".to_string(), AttrValue::from(env!("CARGO_PKG_VERSION")));

        let statistics = self.statistics(&ds1, &ds2)?;
        if let Some(statistics) = &statistics {
            dataset.attrs.extend(statistics.to_attrs());
        }
        log::info!("Done merging datasets");

        Ok(MergedProduct {
            dataset,
            time_difference,
            common_zone,
            area_km2,
            statistics,
        })
    }

    fn format_side(
        &self,
        acquisition: &PreparedAcquisition<'_>,
        dataset: &Dataset,
        window: &TimeWindow,
    ) -> ColocResult<FormattedSide> {
        let mut formatted = dataset.clone();
        let mut attrs = BTreeMap::new();
        for attr in acquisition.necessary_attrs_in_coloc_product() {
            if let Some(value) = dataset.attrs.get(&attr) {
                attrs.insert(acquisition.rename_attrs_in_coloc_product(&attr), value.clone());
            }
        }
        attrs.insert("sourceProduct".to_string(), AttrValue::from(acquisition.product_name()));
        attrs.insert("missionName".to_string(), AttrValue::from(acquisition.mission_name()));

        // truncated swaths are already restricted in time
        let footprint = if acquisition.kind() == AcquisitionKind::TruncatedSwath {
            acquisition.footprint()?
        } else {
            let window = dataset.contains(acquisition.time_name()).then_some(window);
            footprint_from_dataset(
                dataset,
                acquisition.longitude_name(),
                acquisition.latitude_name(),
                acquisition.time_name(),
                window,
            )?
        };
        attrs.insert(
            "footprint".to_string(),
            AttrValue::from(to_wkt(&Geometry::Polygon(footprint))),
        );

        let measurement = measurement_window(acquisition, dataset)?;
        attrs.insert(
            "measurementStartDate".to_string(),
            AttrValue::from(measurement.start.format(MEASUREMENT_DATE_FORMAT).to_string()),
        );
        attrs.insert(
            "measurementStopDate".to_string(),
            AttrValue::from(measurement.stop.format(MEASUREMENT_DATE_FORMAT).to_string()),
        );
        formatted.attrs = attrs;

        let formatted = formatted
            .transpose_spatial(acquisition.latitude_name(), acquisition.longitude_name())
            .drop_vars(&acquisition.unnecessary_vars_in_coloc_product());
        let formatted = acquisition.rename_vars_in_coloc(formatted, &self.common_var_names);
        Ok(FormattedSide {
            dataset: formatted,
            measurement,
        })
    }

    fn statistics(&self, ds1: &Dataset, ds2: &Dataset) -> ColocResult<Option<WindStatistics>> {
        let name1 = format!("{}{}", self.common_var_names.wind_speed, Slot::First.suffix());
        let name2 = format!("{}{}", self.common_var_names.wind_speed, Slot::Second.suffix());
        let (ws1, ws2) = match (ds1.get(&name1), ds2.get(&name2)) {
            (Some(ws1), Some(ws2)) => (ws1, ws2),
            _ => {
                log::warn!("{} or {} missing, skipping wind statistics", name1, name2);
                return Ok(None);
            }
        };
        let (dims, shape) = union_dims(&ws1.dims, ws1.data.shape(), &ws2.dims, ws2.data.shape());
        let a = ws1.broadcast_to(&dims, &shape)?;
        let b = ws2.broadcast_to(&dims, &shape)?;
        wind_statistics(&a, &b).map(Some)
    }
}

/// Span of the finite time samples of `dataset`, else the acquisition window
fn measurement_window(acquisition: &PreparedAcquisition<'_>, dataset: &Dataset) -> ColocResult<TimeWindow> {
    let time = dataset.get(acquisition.time_name());
    let start = time.and_then(|t| t.finite_min()).and_then(datetime_from_seconds);
    let stop = time.and_then(|t| t.finite_max()).and_then(datetime_from_seconds);
    match (start, stop) {
        (Some(start), Some(stop)) => TimeWindow::new(start, stop),
        _ => Ok(acquisition.window()),
    }
}

/// Append the slot suffix to every data variable and attribute
fn with_suffix(dataset: Dataset, slot: Slot) -> Dataset {
    let suffix = slot.suffix();
    Dataset {
        coords: dataset.coords,
        data_vars: dataset
            .data_vars
            .into_iter()
            .map(|(name, variable)| (format!("{}{}", name, suffix), variable))
            .collect(),
        attrs: dataset
            .attrs
            .into_iter()
            .map(|(name, value)| (format!("{}{}", name, suffix), value))
            .collect(),
        crs: dataset.crs,
    }
}

fn footprint_attr(dataset: &Dataset, slot: Slot) -> ColocResult<MultiPolygon<f64>> {
    let name = format!("footprint{}", slot.suffix());
    let text = dataset
        .text_attr(&name)
        .ok_or_else(|| ColocError::MissingVariable(format!("attribute {}", name)))?;
    parse_polygonal_wkt(text)
}

fn footprint_intersection(ds1: &Dataset, ds2: &Dataset) -> ColocResult<MultiPolygon<f64>> {
    let fp1 = footprint_attr(ds1, Slot::First)?;
    let fp2 = footprint_attr(ds2, Slot::Second)?;
    Ok(fp1.intersection(&fp2))
}

/// Single polygons are written as POLYGON rather than a one-member MULTIPOLYGON
fn common_zone_wkt(polygons: &MultiPolygon<f64>) -> String {
    match polygons.0.as_slice() {
        [polygon] => to_wkt(&Geometry::Polygon(polygon.clone())),
        _ => to_wkt(&Geometry::MultiPolygon(polygons.clone())),
    }
}
