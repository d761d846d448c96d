//! Masking and cropping resampled datasets to the common footprint.

use crate::core::geometry::{shift_longitudes, LongitudeFrame};
use crate::core::intersection::{Colocation, Intersection};
use crate::core::rasterize::geometry_mask_on_grid;
use crate::core::resample::ResampledPair;
use crate::dataset::{Dataset, Mask, Variable};
use crate::io::acquisition::PreparedAcquisition;
use crate::types::{round_to, BoundingBox, ColocError, ColocResult, Slot};
use ndarray::Axis;

/// Rounding applied to crop bounds so both grids agree on the same cells
const BOUNDS_DECIMALS: i32 = 6;

/// Common-zone datasets, indexed by [`Slot`]
#[derive(Debug, Clone)]
pub struct CommonZonePair {
    pub datasets: [Dataset; 2],
}

impl CommonZonePair {
    pub fn dataset(&self, slot: Slot) -> &Dataset {
        &self.datasets[slot.index()]
    }
}

/// Bounds of the cells selected by `mask` on a `[lat, lon]` grid
fn mask_bounds(dataset: &Dataset, lon_name: &str, lat_name: &str, mask: &Mask) -> ColocResult<Option<BoundingBox>> {
    let lon = dataset.require(lon_name)?.values_1d()?;
    let lat = dataset.require(lat_name)?.values_1d()?;
    let mut bounds: Option<BoundingBox> = None;
    for (i, row) in mask.data.axis_iter(Axis(0)).enumerate() {
        for (j, &selected) in row.iter().enumerate() {
            if !selected {
                continue;
            }
            let (x, y) = (lon[j], lat[i]);
            bounds = Some(match bounds {
                None => BoundingBox {
                    min_lon: x,
                    max_lon: x,
                    min_lat: y,
                    max_lat: y,
                },
                Some(b) => BoundingBox {
                    min_lon: b.min_lon.min(x),
                    max_lon: b.max_lon.max(x),
                    min_lat: b.min_lat.min(y),
                    max_lat: b.max_lat.max(y),
                },
            });
        }
    }
    Ok(bounds.map(|b| b.rounded(BOUNDS_DECIMALS)))
}

/// Keep the grid indices whose (rounded) coordinates fall inside `bounds`; samples on a bound are kept
fn crop_to_bounds(
    dataset: &Dataset,
    acquisition: &PreparedAcquisition<'_>,
    bounds: Option<&BoundingBox>,
) -> ColocResult<Dataset> {
    let lon = dataset.require(acquisition.longitude_name())?;
    let lat = dataset.require(acquisition.latitude_name())?;
    let (lon_dim, lat_dim) = (lon.dims[0].clone(), lat.dims[0].clone());
    let keep = |values: Vec<f64>, inside: &dyn Fn(f64) -> bool| -> Vec<usize> {
        values
            .iter()
            .enumerate()
            .filter(|&(_, &v)| inside(round_to(v, BOUNDS_DECIMALS)))
            .map(|(i, _)| i)
            .collect()
    };
    let (lon_keep, lat_keep) = match bounds {
        Some(b) => (
            keep(lon.values_1d()?, &|v| b.contains_lon(v)),
            keep(lat.values_1d()?, &|v| b.contains_lat(v)),
        ),
        None => (Vec::new(), Vec::new()),
    };
    Ok(dataset
        .select_indices(&lon_dim, &lon_keep)
        .select_indices(&lat_dim, &lat_keep))
}

fn finalize(dataset: Dataset, acquisition: &PreparedAcquisition<'_>) -> ColocResult<Dataset> {
    let mut dataset = dataset;
    let lon = dataset.require(acquisition.longitude_name())?;
    let signed = Variable {
        dims: lon.dims.clone(),
        data: lon.data.mapv(|v| LongitudeFrame::Signed.wrap(v)),
    };
    dataset.coords.insert(acquisition.longitude_name().to_string(), signed);

    let dataset = match dataset.get(acquisition.time_name()) {
        Some(time) => dataset.where_drop(&time.finite_mask())?,
        None => dataset,
    };
    dataset.squeeze_except(&[acquisition.longitude_name(), acquisition.latitude_name()])
}

/// Restrict both resampled datasets to the common footprint.
///
/// The footprint is burnt (all touched) on the reprojected grid, both
/// datasets are masked with it, cropped to the bounding box of the selected
/// cells, given [-180, 180) longitudes and stripped of not-a-time samples.
pub fn extract_common_zone(
    intersection: &Intersection<'_>,
    colocation: &Colocation,
    resampled: &ResampledPair,
) -> ColocResult<CommonZonePair> {
    log::info!("Starting getting common zone");
    let footprint = colocation.common_footprint.as_ref().ok_or_else(|| {
        ColocError::Processing(format!(
            "no common footprint between {} and {}",
            intersection.first().product_name(),
            intersection.second().product_name()
        ))
    })?;
    let polygons = shift_longitudes(footprint, resampled.frame);

    let slot = resampled.reprojected;
    let grid_acquisition = intersection.acquisition(slot);
    let grid = resampled.dataset(slot);
    let mask = geometry_mask_on_grid(
        grid,
        grid_acquisition.longitude_name(),
        grid_acquisition.latitude_name(),
        &polygons,
    )?;
    log::debug!("{} cells of the common footprint", mask.count());
    let bounds = mask_bounds(
        grid,
        grid_acquisition.longitude_name(),
        grid_acquisition.latitude_name(),
        &mask,
    )?;

    let common_zone = |slot: Slot| -> ColocResult<Dataset> {
        let acquisition = intersection.acquisition(slot);
        let masked = resampled.dataset(slot).where_mask(&mask)?;
        let cropped = crop_to_bounds(&masked, acquisition, bounds.as_ref())?;
        finalize(cropped, acquisition)
    };
    let datasets = [common_zone(Slot::First)?, common_zone(Slot::Second)?];
    log::info!("Done getting common zone");
    Ok(CommonZonePair { datasets })
}
