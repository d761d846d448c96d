//! Pairwise spatio-temporal intersection of two acquisitions.
//!
//! [`Intersection::evaluate`] widens both time windows by the configured
//! tolerance, rejects the pair immediately when they do not overlap, and
//! otherwise dispatches on the two acquisition kinds. Every algorithm grows a
//! common footprint by union and the pair is accepted once its area reaches
//! the minimal area.

use crate::core::geometry::{footprint_from_dataset, footprint_from_grid, multipolygon_area_km2};
use crate::core::rasterize::rasterize_polygon_on_grid;
use crate::core::selection::extract_times;
use crate::dataset::{Dataset, Mask};
use crate::io::acquisition::{reformat_meta, Acquisition, PreparedAcquisition};
use crate::io::config::IntersectionSettings;
use crate::types::{AcquisitionKind, ColocError, ColocResult, Slot, TimeWindow};
use geo::{BooleanOps, BoundingRect, Intersects, MultiPolygon, Polygon};

/// Result of evaluating a pair
#[derive(Debug, Clone)]
pub enum IntersectionOutcome {
    /// Widened time windows are disjoint; no geometry was computed
    NoTimeOverlap,
    /// Times overlap but the common footprint is missing or too small
    Rejected {
        window: TimeWindow,
        common_footprint: Option<MultiPolygon<f64>>,
        area_km2: Option<f64>,
    },
    Accepted(Colocation),
    /// No matching algorithm exists for this pair of kinds
    Unsupported {
        first: AcquisitionKind,
        second: AcquisitionKind,
    },
}

impl IntersectionOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, IntersectionOutcome::Accepted(_))
    }

    pub fn common_footprint(&self) -> Option<&MultiPolygon<f64>> {
        match self {
            IntersectionOutcome::Accepted(colocation) => colocation.common_footprint.as_ref(),
            IntersectionOutcome::Rejected { common_footprint, .. } => common_footprint.as_ref(),
            _ => None,
        }
    }

    /// Accept/reject as a boolean; unsupported pairs are an error
    pub fn to_bool(&self) -> ColocResult<bool> {
        match self {
            IntersectionOutcome::Unsupported { first, second } => Err(ColocError::UnsupportedCombination {
                first: *first,
                second: *second,
            }),
            other => Ok(other.is_accepted()),
        }
    }
}

/// Everything an accepted pair hands to product generation
#[derive(Debug, Clone)]
pub struct Colocation {
    /// Overlap of the widened time windows
    pub window: TimeWindow,
    /// `None` only for model pairs evaluated without product generation
    pub common_footprint: Option<MultiPolygon<f64>>,
    pub area_km2: Option<f64>,
    /// Datasets already cropped by the dispatcher, indexed by [`Slot`]
    pub cropped: [Option<Dataset>; 2],
}

impl Colocation {
    pub fn cropped(&self, slot: Slot) -> Option<&Dataset> {
        self.cropped[slot.index()].as_ref()
    }
}

/// True when `footprint` exists and covers at least `minimal_area_km2`
pub fn is_considered_as_intersected(
    footprint: Option<&MultiPolygon<f64>>,
    minimal_area_km2: f64,
) -> ColocResult<bool> {
    match footprint {
        Some(polygons) => Ok(multipolygon_area_km2(polygons)? >= minimal_area_km2),
        None => Ok(false),
    }
}

/// Common footprint grown by union across sub-intersections
#[derive(Debug)]
struct FootprintAccumulator {
    footprint: Option<MultiPolygon<f64>>,
    minimal_area_km2: f64,
}

impl FootprintAccumulator {
    fn fill(&mut self, polygons: MultiPolygon<f64>) {
        self.footprint = Some(match self.footprint.take() {
            Some(current) => current.union(&polygons),
            None => polygons,
        });
    }

    fn fill_polygon(&mut self, polygon: Polygon<f64>) {
        self.fill(MultiPolygon::new(vec![polygon]));
    }

    fn area_km2(&self) -> ColocResult<Option<f64>> {
        self.footprint.as_ref().map(multipolygon_area_km2).transpose()
    }

    fn is_considered_as_intersected(&self) -> ColocResult<bool> {
        is_considered_as_intersected(self.footprint.as_ref(), self.minimal_area_km2)
    }
}

/// Scratch state of a single evaluation
struct Evaluation {
    accumulator: FootprintAccumulator,
    cropped: [Option<Dataset>; 2],
}

fn is_empty_crop(dataset: &Dataset) -> bool {
    dataset.are_dimensions_empty() || dataset.has_empty_dimension()
}

/// Relationship between two acquisitions.
///
/// Construction renames coordinates to the canonical names once; the
/// acquisitions themselves are only borrowed. `evaluate` is pure, so callers
/// keep its outcome instead of evaluating twice.
pub struct Intersection<'a> {
    first: PreparedAcquisition<'a>,
    second: PreparedAcquisition<'a>,
    settings: IntersectionSettings,
}

impl<'a> Intersection<'a> {
    pub fn new(
        first: &'a dyn Acquisition,
        second: &'a dyn Acquisition,
        settings: IntersectionSettings,
    ) -> ColocResult<Self> {
        let first = reformat_meta(first, &settings.common_var_names)?;
        let second = reformat_meta(second, &settings.common_var_names)?;
        Ok(Self {
            first,
            second,
            settings,
        })
    }

    pub fn first(&self) -> &PreparedAcquisition<'a> {
        &self.first
    }

    pub fn second(&self) -> &PreparedAcquisition<'a> {
        &self.second
    }

    pub fn acquisition(&self, slot: Slot) -> &PreparedAcquisition<'a> {
        match slot {
            Slot::First => &self.first,
            Slot::Second => &self.second,
        }
    }

    pub fn settings(&self) -> &IntersectionSettings {
        &self.settings
    }

    /// Overlap of both windows widened by the delta time, `None` when disjoint
    pub fn overlap_window(&self) -> Option<TimeWindow> {
        let delta = self.settings.delta_time;
        self.first
            .window()
            .widened(delta)
            .overlap(&self.second.window().widened(delta))
    }

    /// Shorthand for `evaluate()?.to_bool()`
    pub fn has_intersection(&self) -> ColocResult<bool> {
        self.evaluate()?.to_bool()
    }

    pub fn evaluate(&self) -> ColocResult<IntersectionOutcome> {
        let window = match self.overlap_window() {
            Some(window) => window,
            None => {
                log::debug!(
                    "No time match between {} and {}",
                    self.first.product_name(),
                    self.second.product_name()
                );
                return Ok(IntersectionOutcome::NoTimeOverlap);
            }
        };

        let mut state = Evaluation {
            accumulator: FootprintAccumulator {
                footprint: None,
                minimal_area_km2: self.settings.minimal_area_km2,
            },
            cropped: [None, None],
        };

        use AcquisitionKind::*;
        let (first_kind, second_kind) = (self.first.kind(), self.second.kind());
        let accepted = match (first_kind, second_kind) {
            (TruncatedSwath, TruncatedSwath) => self.truncated_with_truncated(&mut state)?,
            (TruncatedSwath, DailyRegularGrid) => {
                self.truncated_with_daily(Slot::First, Slot::Second, &window, &mut state)?
            }
            (DailyRegularGrid, TruncatedSwath) => {
                self.truncated_with_daily(Slot::Second, Slot::First, &window, &mut state)?
            }
            (TruncatedSwath, Swath) => self.truncated_with_swath(Slot::First, Slot::Second, &window, &mut state)?,
            (Swath, TruncatedSwath) => self.truncated_with_swath(Slot::Second, Slot::First, &window, &mut state)?,
            (ModelRegularGrid, _) => self.with_model(Slot::First, &mut state)?,
            (_, ModelRegularGrid) => self.with_model(Slot::Second, &mut state)?,
            (Swath, Swath)
            | (DailyRegularGrid, DailyRegularGrid)
            | (DailyRegularGrid, Swath)
            | (Swath, DailyRegularGrid) => {
                log::warn!(
                    "Intersection between {} ({}) and {} ({}) hasn't been implemented",
                    self.first.product_name(),
                    first_kind,
                    self.second.product_name(),
                    second_kind
                );
                return Ok(IntersectionOutcome::Unsupported {
                    first: first_kind,
                    second: second_kind,
                });
            }
        };

        let area_km2 = state.accumulator.area_km2()?;
        log::info!(
            "{} / {}: {} (common area {})",
            self.first.product_name(),
            self.second.product_name(),
            if accepted { "co-located" } else { "not co-located" },
            area_km2.map_or_else(|| "unknown".to_string(), |a| format!("{:.1} km2", a))
        );

        let common_footprint = state.accumulator.footprint;
        if accepted {
            Ok(IntersectionOutcome::Accepted(Colocation {
                window,
                common_footprint,
                area_km2,
                cropped: state.cropped,
            }))
        } else {
            Ok(IntersectionOutcome::Rejected {
                window,
                common_footprint,
                area_km2,
            })
        }
    }

    fn truncated_with_truncated(&self, state: &mut Evaluation) -> ColocResult<bool> {
        let fp1 = self.first.footprint()?;
        let fp2 = self.second.footprint()?;
        if fp1.intersects(&fp2) {
            state.accumulator.fill(fp1.intersection(&fp2));
        }
        state.accumulator.is_considered_as_intersected()
    }

    fn truncated_with_daily(
        &self,
        truncated_slot: Slot,
        daily_slot: Slot,
        window: &TimeWindow,
        state: &mut Evaluation,
    ) -> ColocResult<bool> {
        let truncated = self.acquisition(truncated_slot);
        let daily = self.acquisition(daily_slot);
        let footprint = truncated.footprint()?;
        let dataset = daily.require_dataset()?;
        let raster = rasterize_polygon_on_grid(daily, dataset, &footprint)?;

        match daily.orbit_segment_name() {
            Some(orbit) => {
                let count = dataset.dim_len(orbit)?;
                let mut masks = Vec::with_capacity(count);
                let mut intersected = false;
                for index in 0..count {
                    let segment = daily.narrow_to_segment(index)?;
                    let mask = daily_selection_mask(&segment, &raster, window)?;
                    let cropped = segment.require_dataset()?.where_drop(&mask)?;
                    let hit = verify_grid_intersection(&segment, &cropped, &footprint, state)?;
                    log::debug!(
                        "{} {} {}: {}",
                        daily.product_name(),
                        orbit,
                        index,
                        if hit { "intersected" } else { "no intersection" }
                    );
                    intersected |= hit;
                    masks.push(mask);
                }
                let stacked = Mask::stack(orbit, &masks)?;
                state.cropped[daily_slot.index()] = Some(dataset.where_drop(&stacked)?);
                Ok(intersected)
            }
            None => {
                let mask = daily_selection_mask(daily, &raster, window)?;
                let cropped = dataset.where_drop(&mask)?;
                let hit = verify_grid_intersection(daily, &cropped, &footprint, state)?;
                state.cropped[daily_slot.index()] = Some(cropped);
                Ok(hit)
            }
        }
    }

    fn truncated_with_swath(
        &self,
        truncated_slot: Slot,
        swath_slot: Slot,
        window: &TimeWindow,
        state: &mut Evaluation,
    ) -> ColocResult<bool> {
        let truncated = self.acquisition(truncated_slot);
        let swath = self.acquisition(swath_slot);
        let footprint = truncated.footprint()?;

        match swath.orbit_segment_name() {
            Some(orbit) => {
                let count = swath.segment_count()?;
                let mut intersected = false;
                for index in 0..count {
                    let segment = swath.narrow_to_segment(index)?;
                    let hit = verify_swath_intersection(&segment, &footprint, window, state)?;
                    log::debug!(
                        "{} {} {}: {}",
                        swath.product_name(),
                        orbit,
                        index,
                        if hit { "intersected" } else { "no intersection" }
                    );
                    intersected |= hit;
                }
                Ok(intersected)
            }
            None => verify_swath_intersection(swath, &footprint, window, state),
        }
    }

    /// Model grids are assumed to cover the globe at their valid time, so the pair is always accepted
    fn with_model(&self, model_slot: Slot, state: &mut Evaluation) -> ColocResult<bool> {
        if !self.settings.product_generation {
            return Ok(true);
        }
        let model = self.acquisition(model_slot);
        let other = self.acquisition(model_slot.other());

        let footprint = match other.dataset() {
            Some(_) => footprint_from_grid(other, None, None)?,
            None => other.footprint()?,
        };
        if other.kind() == AcquisitionKind::TruncatedSwath && model.dataset().is_some() {
            let cropped = crop_model(model, &other.footprint()?)?;
            state.cropped[model_slot.index()] = Some(cropped);
        }
        state.accumulator.fill_polygon(footprint);
        Ok(true)
    }
}

/// Cells of a daily grid inside the rasterized footprint, inside the window, with a valid wind
fn daily_selection_mask(
    daily: &PreparedAcquisition<'_>,
    raster: &Mask,
    window: &TimeWindow,
) -> ColocResult<Mask> {
    let dataset = daily.require_dataset()?;
    let in_window = dataset
        .require(daily.time_name())?
        .predicate_mask(|t| window.contains_seconds(t));
    let valid_wind = dataset.require(daily.wind_name())?.finite_mask();
    raster.and(&in_window)?.and(&valid_wind)
}

fn verify_grid_intersection(
    daily: &PreparedAcquisition<'_>,
    cropped: &Dataset,
    footprint: &Polygon<f64>,
    state: &mut Evaluation,
) -> ColocResult<bool> {
    if is_empty_crop(cropped) {
        return Ok(false);
    }
    let polygon = footprint_from_grid(daily, Some(cropped), None)?;
    if polygon.intersects(footprint) {
        state.accumulator.fill(polygon.intersection(footprint));
    }
    state.accumulator.is_considered_as_intersected()
}

/// Swath samples strictly inside the footprint's bounding box and inside the window
fn verify_swath_intersection(
    swath: &PreparedAcquisition<'_>,
    footprint: &Polygon<f64>,
    window: &TimeWindow,
    state: &mut Evaluation,
) -> ColocResult<bool> {
    let bounds = match footprint.bounding_rect() {
        Some(bounds) => bounds,
        None => return Ok(false),
    };
    let dataset = swath.require_dataset()?;
    let (min, max) = (bounds.min(), bounds.max());
    let in_lon = dataset
        .require(swath.longitude_name())?
        .predicate_mask(|lon| lon > min.x && lon < max.x);
    let in_lat = dataset
        .require(swath.latitude_name())?
        .predicate_mask(|lat| lat > min.y && lat < max.y);
    let in_box = dataset.where_drop(&in_lon.and(&in_lat)?)?;
    let selected = extract_times(&in_box, swath.time_name(), window)?;
    if is_empty_crop(&selected) {
        return Ok(false);
    }
    let polygon = footprint_from_dataset(
        &selected,
        swath.longitude_name(),
        swath.latitude_name(),
        swath.time_name(),
        None,
    )?;
    if polygon.intersects(footprint) {
        state.accumulator.fill(polygon.intersection(footprint));
    }
    state.accumulator.is_considered_as_intersected()
}

/// Model grid restricted to the cells rasterized from `footprint`
fn crop_model(model: &PreparedAcquisition<'_>, footprint: &Polygon<f64>) -> ColocResult<Dataset> {
    let dataset = model.require_dataset()?;
    let raster = rasterize_polygon_on_grid(model, dataset, footprint)?;
    Ok(dataset
        .where_mask(&raster)?
        .dropna_all(model.longitude_name())
        .dropna_all(model.latitude_name()))
}
