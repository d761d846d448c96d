//! Time filtering, nearest-time collapsing and pairwise validity masks.

use crate::dataset::Dataset;
use crate::io::acquisition::PreparedAcquisition;
use crate::types::{AcquisitionKind, ColocResult, TimeWindow};

/// Keep the samples whose time lies inside `window` (inclusive), dropping empty indices
pub fn extract_times(dataset: &Dataset, time_name: &str, window: &TimeWindow) -> ColocResult<Dataset> {
    let time = dataset.require(time_name)?;
    let mask = time.predicate_mask(|t| window.contains_seconds(t));
    dataset.where_drop(&mask)
}

/// Restrict both datasets so that every variable present in both is valid in both.
///
/// The operation is idempotent.
pub fn common_points_mask(first: &Dataset, second: &Dataset) -> ColocResult<(Dataset, Dataset)> {
    let mut first = first.clone();
    let mut second = second.clone();
    let shared: Vec<String> = first
        .data_vars
        .keys()
        .filter(|name| second.data_vars.contains_key(*name))
        .cloned()
        .collect();

    for name in shared {
        let v1 = first.require(&name)?;
        let v2 = second.require(&name)?;
        let mask = v1.finite_mask().and(&v2.finite_mask())?;
        let masked1 = v1.masked(&mask)?;
        let masked2 = v2.masked(&mask)?;
        first.data_vars.insert(name.clone(), masked1);
        second.data_vars.insert(name, masked2);
    }
    Ok((first, second))
}

fn first_finite(dataset: &Dataset, time_name: &str) -> Option<f64> {
    dataset
        .get(time_name)
        .and_then(|time| time.data.iter().copied().find(|t| t.is_finite()))
}

/// Index of the sample of `times` nearest to `target`
fn nearest_index(times: &[f64], target: f64) -> Option<usize> {
    times
        .iter()
        .enumerate()
        .filter(|(_, t)| t.is_finite())
        .min_by(|(_, a), (_, b)| (*a - target).abs().total_cmp(&(*b - target).abs()))
        .map(|(index, _)| index)
}

/// Collapse a multi-time side onto its sample nearest to the other side's time.
///
/// Only applies when one of the acquisitions is a model grid; no-op otherwise.
pub fn nearest_time_select(
    first: &PreparedAcquisition<'_>,
    first_ds: Dataset,
    second: &PreparedAcquisition<'_>,
    second_ds: Dataset,
) -> ColocResult<(Dataset, Dataset)> {
    if first.kind() != AcquisitionKind::ModelRegularGrid && second.kind() != AcquisitionKind::ModelRegularGrid {
        return Ok((first_ds, second_ds));
    }

    let spatial = |acq: &PreparedAcquisition<'_>| [acq.longitude_name().to_string(), acq.latitude_name().to_string()];

    let collapse = |acq: &PreparedAcquisition<'_>, ds: &Dataset, target: f64| -> ColocResult<Option<Dataset>> {
        let time = match ds.get(acq.time_name()) {
            Some(time) if time.dims.len() == 1 && time.data.len() > 1 => time,
            _ => return Ok(None),
        };
        let times = time.values_1d()?;
        let index = match nearest_index(&times, target) {
            Some(index) => index,
            None => return Ok(None),
        };
        log::debug!(
            "Selecting time index {} of {} nearest to the other acquisition",
            index,
            acq.product_name()
        );
        let names = spatial(acq);
        let keep = [names[0].as_str(), names[1].as_str()];
        Ok(Some(ds.isel(&time.dims[0], index)?.squeeze_except(&keep)?))
    };

    if let Some(target) = first_finite(&second_ds, second.time_name()) {
        if let Some(collapsed) = collapse(first, &first_ds, target)? {
            return Ok((collapsed, second_ds));
        }
    }
    if let Some(target) = first_finite(&first_ds, first.time_name()) {
        if let Some(collapsed) = collapse(second, &second_ds, target)? {
            return Ok((first_ds, collapsed));
        }
    }
    Ok((first_ds, second_ds))
}

/// Drop not-a-time samples, squeeze, and drop an orbit coordinate no variable uses anymore
pub fn remove_nat(acquisition: &PreparedAcquisition<'_>, dataset: &Dataset) -> ColocResult<Dataset> {
    let keep = [acquisition.longitude_name(), acquisition.latitude_name()];
    let mut cleaned = match dataset.get(acquisition.time_name()) {
        Some(time) => dataset.where_drop(&time.finite_mask())?,
        None => dataset.clone(),
    }
    .squeeze_except(&keep)?;
    if let Some(orbit) = acquisition.source().orbit_segment_name() {
        cleaned = cleaned.drop_unused_dim_coord(orbit);
    }
    Ok(cleaned)
}
