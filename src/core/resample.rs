//! Bringing both datasets of an accepted pair onto the coarser of the two grids.

use crate::core::geometry::{straddles_antimeridian, LongitudeFrame};
use crate::core::intersection::{Colocation, Intersection};
use crate::core::selection::{nearest_time_select, remove_nat};
use crate::dataset::{Dataset, Variable};
use crate::io::acquisition::PreparedAcquisition;
use crate::io::config::ResamplingMethod;
use crate::types::{ColocError, ColocResult, Slot};
use ndarray::{Array3, ArrayView2, IxDyn, Zip};

/// EPSG code of geographic WGS84 coordinates
pub const GEOGRAPHIC_EPSG: u32 = 4326;

const X: &str = "x";
const Y: &str = "y";

/// Both datasets on one grid
#[derive(Debug, Clone)]
pub struct ResampledPair {
    pub datasets: [Dataset; 2],
    /// Side interpolated onto the other's grid
    pub reprojected: Slot,
    /// Longitude convention of the shared grid
    pub frame: LongitudeFrame,
}

impl ResampledPair {
    pub fn dataset(&self, slot: Slot) -> &Dataset {
        &self.datasets[slot.index()]
    }
}

fn replace_variable(dataset: &mut Dataset, name: &str, variable: Variable) {
    if dataset.data_vars.contains_key(name) {
        dataset.data_vars.insert(name.to_string(), variable);
    } else {
        dataset.coords.insert(name.to_string(), variable);
    }
}

/// Wrap longitudes into `frame` and sort a 1D longitude axis.
///
/// 2D longitudes are wrapped in place without reordering.
pub fn normalize_longitudes_in(dataset: &Dataset, lon_name: &str, frame: LongitudeFrame) -> ColocResult<Dataset> {
    let lon = dataset.require(lon_name)?;
    if lon.dims.len() != 1 {
        let mut result = dataset.clone();
        let wrapped = Variable {
            dims: lon.dims.clone(),
            data: lon.data.mapv(|v| frame.wrap(v)),
        };
        replace_variable(&mut result, lon_name, wrapped);
        return Ok(result);
    }

    let dim = lon.dims[0].clone();
    let wrapped: Vec<f64> = lon.values_1d()?.into_iter().map(|v| frame.wrap(v)).collect();
    let mut order: Vec<usize> = (0..wrapped.len()).collect();
    order.sort_by(|&a, &b| wrapped[a].total_cmp(&wrapped[b]));

    let mut result = if order.iter().enumerate().all(|(i, &o)| i == o) {
        dataset.clone()
    } else {
        dataset.select_indices(&dim, &order)
    };
    let sorted = order.iter().map(|&i| wrapped[i]).collect();
    replace_variable(&mut result, lon_name, Variable::from_vec(&dim, sorted));
    Ok(result)
}

/// Fold a longitude axis into the convention that keeps it contiguous, preferring [-180, 180)
pub fn normalize_longitudes(dataset: &Dataset, lon_name: &str) -> ColocResult<Dataset> {
    let lon = dataset.require(lon_name)?;
    let frame = if lon.dims.len() == 1 {
        let values = lon.values_1d()?;
        LongitudeFrame::contiguous_for(&[&values], LongitudeFrame::Signed)
    } else {
        LongitudeFrame::Signed
    };
    normalize_longitudes_in(dataset, lon_name, frame)
}

fn wrap_values(dataset: Dataset, lon_name: &str, frame: LongitudeFrame) -> ColocResult<Dataset> {
    let mut result = dataset;
    let lon = result.require(lon_name)?;
    let wrapped = Variable {
        dims: lon.dims.clone(),
        data: lon.data.mapv(|v| frame.wrap(v)),
    };
    replace_variable(&mut result, lon_name, wrapped);
    Ok(result)
}

fn regular_axis(dataset: &Dataset, name: &str, product: &str) -> ColocResult<Vec<f64>> {
    let axis = dataset.require(name)?;
    if axis.dims.len() != 1 {
        return Err(ColocError::GeometryType(format!(
            "{} has {}D coordinates, resampling needs a regular grid",
            product,
            axis.dims.len()
        )));
    }
    axis.values_1d()
}

fn pixel_spacing(axis: &[f64], name: &str) -> ColocResult<f64> {
    if axis.len() < 2 {
        return Err(ColocError::Processing(format!(
            "cannot derive a pixel spacing along {} from {} sample(s)",
            name,
            axis.len()
        )));
    }
    Ok((axis[1] - axis[0]).abs())
}

/// Fractional position of `value` along a monotonic axis, `None` outside it
fn fractional_index(axis: &[f64], value: f64) -> Option<f64> {
    let n = axis.len();
    if n == 0 || !value.is_finite() {
        return None;
    }
    if n == 1 {
        return ((axis[0] - value).abs() <= 1e-9).then_some(0.0);
    }
    let ascending = axis[n - 1] >= axis[0];
    let (lo, hi) = if ascending {
        (axis[0], axis[n - 1])
    } else {
        (axis[n - 1], axis[0])
    };
    let tolerance = 1e-9 * (hi - lo).abs().max(1.0);
    if value < lo - tolerance || value > hi + tolerance {
        return None;
    }
    let upper = if ascending {
        axis.partition_point(|&a| a <= value)
    } else {
        axis.partition_point(|&a| a >= value)
    };
    let i = upper.clamp(1, n - 1) - 1;
    let (a, b) = (axis[i], axis[i + 1]);
    let t = if b != a { ((value - a) / (b - a)).clamp(0.0, 1.0) } else { 0.0 };
    Some(i as f64 + t)
}

fn sample(plane: &ArrayView2<f64>, fy: f64, fx: f64, method: ResamplingMethod) -> f64 {
    let (ny, nx) = plane.dim();
    match method {
        ResamplingMethod::Nearest => {
            let i = (fy.round() as usize).min(ny - 1);
            let j = (fx.round() as usize).min(nx - 1);
            plane[[i, j]]
        }
        ResamplingMethod::Bilinear => {
            let y0 = fy.floor() as usize;
            let x0 = fx.floor() as usize;
            let y1 = (y0 + 1).min(ny - 1);
            let x1 = (x0 + 1).min(nx - 1);
            let ty = fy - y0 as f64;
            let tx = fx - x0 as f64;
            let neighbours = [
                (y0, x0, (1.0 - ty) * (1.0 - tx)),
                (y0, x1, (1.0 - ty) * tx),
                (y1, x0, ty * (1.0 - tx)),
                (y1, x1, ty * tx),
            ];
            // Missing neighbours are left out and the remaining weights renormalized
            let (sum, weight) = neighbours
                .iter()
                .filter(|(_, _, w)| *w > 0.0)
                .map(|&(i, j, w)| (plane[[i, j]], w))
                .filter(|(v, _)| v.is_finite())
                .fold((0.0, 0.0), |(s, tw), (v, w)| (s + v * w, tw + w));
            if weight > 0.0 {
                sum / weight
            } else {
                f64::NAN
            }
        }
    }
}

fn resample_variable(
    variable: &Variable,
    y_index: &[Option<f64>],
    x_index: &[Option<f64>],
    method: ResamplingMethod,
) -> ColocResult<Variable> {
    let ordered = variable.with_trailing_dims(&[Y, X]);
    let shape = ordered.data.shape().to_vec();
    let (ny, nx) = (shape[shape.len() - 2], shape[shape.len() - 1]);
    let lead_shape = &shape[..shape.len() - 2];
    let lead: usize = lead_shape.iter().product();

    let cube = ordered
        .data
        .as_standard_layout()
        .into_owned()
        .into_shape((lead, ny, nx))
        .map_err(|e| ColocError::Processing(format!("cannot reshape {:?}: {}", ordered.dims, e)))?;

    let mut out = Array3::from_elem((lead, y_index.len(), x_index.len()), f64::NAN);
    if ny > 0 && nx > 0 {
        for (k, mut plane_out) in out.outer_iter_mut().enumerate() {
            let plane = cube.index_axis(ndarray::Axis(0), k);
            let fill = |(i, j): (usize, usize), value: &mut f64| {
                if let (Some(fy), Some(fx)) = (y_index[i], x_index[j]) {
                    *value = sample(&plane, fy, fx, method);
                }
            };
            #[cfg(feature = "parallel")]
            Zip::indexed(&mut plane_out).par_for_each(fill);
            #[cfg(not(feature = "parallel"))]
            Zip::indexed(&mut plane_out).for_each(fill);
        }
    }

    let mut out_shape = lead_shape.to_vec();
    out_shape.push(y_index.len());
    out_shape.push(x_index.len());
    let data = out
        .into_shape(IxDyn(&out_shape))
        .map_err(|e| ColocError::Processing(format!("cannot reshape resampled {:?}: {}", ordered.dims, e)))?;
    Ok(Variable {
        dims: ordered.dims,
        data,
    })
}

/// Interpolate `source` onto the `x`/`y` grid of `target`
pub fn reproject_match(source: &Dataset, target: &Dataset, method: ResamplingMethod) -> ColocResult<Dataset> {
    let target_x = target.require(X)?.values_1d()?;
    let target_y = target.require(Y)?.values_1d()?;
    let source_x = source.require(X)?.values_1d()?;
    let source_y = source.require(Y)?.values_1d()?;
    let x_index: Vec<Option<f64>> = target_x.iter().map(|&x| fractional_index(&source_x, x)).collect();
    let y_index: Vec<Option<f64>> = target_y.iter().map(|&y| fractional_index(&source_y, y)).collect();

    let mut result = Dataset {
        attrs: source.attrs.clone(),
        crs: target.crs.or(source.crs),
        ..Dataset::default()
    };
    for (name, variable) in &source.coords {
        if name != X && name != Y && !variable.has_dim(X) && !variable.has_dim(Y) {
            result.coords.insert(name.clone(), variable.clone());
        }
    }
    result.coords.insert(X.to_string(), target.require(X)?.clone());
    result.coords.insert(Y.to_string(), target.require(Y)?.clone());

    for (name, variable) in &source.data_vars {
        match (variable.has_dim(Y), variable.has_dim(X)) {
            (true, true) => {
                let resampled = resample_variable(variable, &y_index, &x_index, method)?;
                result.data_vars.insert(name.clone(), resampled);
            }
            (false, false) => {
                result.data_vars.insert(name.clone(), variable.clone());
            }
            _ => log::debug!("Dropping {} which spans a single horizontal axis", name),
        }
    }
    Ok(result)
}

fn source_dataset(acquisition: &PreparedAcquisition<'_>, cropped: Option<&Dataset>) -> ColocResult<Dataset> {
    match cropped {
        Some(dataset) => Ok(dataset.clone()),
        None => Ok(acquisition.require_dataset()?.clone()),
    }
}

/// Resample an accepted pair onto the coarser grid.
///
/// Datasets cropped by the dispatcher are preferred over full grids. The
/// finer dataset (smaller pixel area, the first one on ties) is interpolated.
pub fn coloc_resample(
    intersection: &Intersection<'_>,
    colocation: &Colocation,
    method: ResamplingMethod,
) -> ColocResult<ResampledPair> {
    log::info!("Starting resampling");
    let first = intersection.first();
    let second = intersection.second();

    let ds1 = source_dataset(first, colocation.cropped(Slot::First))?;
    let ds2 = source_dataset(second, colocation.cropped(Slot::Second))?;
    let (ds1, ds2) = nearest_time_select(first, ds1, second, ds2)?;
    let mut ds1 = remove_nat(first, &ds1)?;
    let mut ds2 = remove_nat(second, &ds2)?;
    ds1.crs.get_or_insert(GEOGRAPHIC_EPSG);
    ds2.crs.get_or_insert(GEOGRAPHIC_EPSG);

    let ds1 = ds1.rename(first.longitude_name(), X).rename(first.latitude_name(), Y);
    let ds2 = ds2.rename(second.longitude_name(), X).rename(second.latitude_name(), Y);

    let x1 = regular_axis(&ds1, X, first.product_name())?;
    let y1 = regular_axis(&ds1, Y, first.product_name())?;
    let x2 = regular_axis(&ds2, X, second.product_name())?;
    let y2 = regular_axis(&ds2, Y, second.product_name())?;
    let area1 = pixel_spacing(&x1, X)? * pixel_spacing(&y1, Y)?;
    let area2 = pixel_spacing(&x2, X)? * pixel_spacing(&y2, Y)?;

    let straddles = straddles_antimeridian(&x1) || straddles_antimeridian(&x2);
    let (ds1, ds2, frame) = if straddles {
        log::debug!("Longitudes straddle the antimeridian, wrapping after reprojection");
        (ds1, ds2, None)
    } else {
        let frame = LongitudeFrame::contiguous_for(&[&x1, &x2], LongitudeFrame::Positive);
        log::debug!("Wrapping longitudes into {:?} before reprojection", frame);
        (
            normalize_longitudes_in(&ds1, X, frame)?,
            normalize_longitudes_in(&ds2, X, frame)?,
            Some(frame),
        )
    };

    let reprojected = if area1 <= area2 { Slot::First } else { Slot::Second };
    let (ds1, ds2) = match reprojected {
        Slot::First => (reproject_match(&ds1, &ds2, method)?, ds2),
        Slot::Second => {
            let ds2 = reproject_match(&ds2, &ds1, method)?;
            (ds1, ds2)
        }
    };
    log::debug!(
        "{} reprojected onto the grid of {}",
        intersection.acquisition(reprojected).product_name(),
        intersection.acquisition(reprojected.other()).product_name()
    );

    let (ds1, ds2, frame) = match frame {
        Some(frame) => (ds1, ds2, frame),
        None => (
            wrap_values(ds1, X, LongitudeFrame::Positive)?,
            wrap_values(ds2, X, LongitudeFrame::Positive)?,
            LongitudeFrame::Positive,
        ),
    };

    let ds1 = ds1.rename(X, first.longitude_name()).rename(Y, first.latitude_name());
    let ds2 = ds2.rename(X, second.longitude_name()).rename(Y, second.latitude_name());
    log::info!("Done resampling");
    Ok(ResampledPair {
        datasets: [ds1, ds2],
        reprojected,
        frame,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn lon_grid(lon: Vec<f64>) -> Dataset {
        let n = lon.len();
        let values = Array2::from_shape_fn((2, n), |(_, j)| lon[j]);
        Dataset::new()
            .with_coord("lon", Variable::from_vec("lon", lon))
            .with_coord("lat", Variable::from_vec("lat", vec![0.0, 1.0]))
            .with_var("marker", Variable::from_array2(["lat", "lon"], values))
    }

    #[test]
    fn test_normalize_is_noop_on_signed_grid() {
        let ds = lon_grid((-180..180).step_by(10).map(f64::from).collect());
        let normalized = normalize_longitudes(&ds, "lon").unwrap();
        assert_eq!(normalized, ds);
    }

    #[test]
    fn test_normalize_keeps_pacific_grid_contiguous() {
        let mut lon: Vec<f64> = (-180..=-170).map(f64::from).collect();
        lon.extend((170..180).map(f64::from));
        let ds = lon_grid(lon);
        let normalized = normalize_longitudes(&ds, "lon").unwrap();
        let values = normalized.require("lon").unwrap().values_1d().unwrap();
        let expected: Vec<f64> = (170..=190).map(f64::from).collect();
        assert_eq!(values, expected);
        // data follows its coordinate
        let marker = &normalized.require("marker").unwrap().data;
        assert_eq!(marker[[0, 0]], 170.0);
        assert_eq!(marker[[1, 20]], -170.0);
    }

    #[test]
    fn test_fractional_index_handles_descending_axes() {
        let ascending = [0.0, 1.0, 2.0];
        let descending = [2.0, 1.0, 0.0];
        assert_relative_eq!(fractional_index(&ascending, 1.25).unwrap(), 1.25);
        assert_relative_eq!(fractional_index(&descending, 1.25).unwrap(), 0.75);
        assert_eq!(fractional_index(&ascending, 2.5), None);
    }

    #[test]
    fn test_bilinear_reprojection_of_a_plane() {
        let fine_x: Vec<f64> = (0..11).map(|i| i as f64 * 0.5).collect();
        let fine_y: Vec<f64> = (0..11).map(|i| i as f64 * 0.5).collect();
        let plane = Array2::from_shape_fn((11, 11), |(i, j)| fine_x[j] + 2.0 * fine_y[i]);
        let source = Dataset::new()
            .with_coord(X, Variable::from_vec(X, fine_x))
            .with_coord(Y, Variable::from_vec(Y, fine_y))
            .with_var("v", Variable::from_array2([Y, X], plane));
        let target = Dataset::new()
            .with_coord(X, Variable::from_vec(X, vec![0.25, 1.75, 3.25, 6.0]))
            .with_coord(Y, Variable::from_vec(Y, vec![0.75, 2.25]));
        let out = reproject_match(&source, &target, ResamplingMethod::Bilinear).unwrap();
        let v = &out.require("v").unwrap().data;
        assert_eq!(v.shape(), &[2, 4]);
        assert_relative_eq!(v[[0, 0]], 0.25 + 1.5, epsilon = 1e-12);
        assert_relative_eq!(v[[1, 2]], 3.25 + 4.5, epsilon = 1e-12);
        // outside the source grid
        assert!(v[[0, 3]].is_nan());
    }

    fn axis(start: f64, step: f64, count: usize) -> Vec<f64> {
        (0..count).map(|i| start + step * i as f64).collect()
    }

    /// Regular grid record whose wind is `wind(lon)` on every row
    fn grid_record(
        name: &str,
        kind: crate::types::AcquisitionKind,
        lon: Vec<f64>,
        lat: Vec<f64>,
        wind: impl Fn(f64) -> f64,
    ) -> crate::io::acquisition::AcquisitionRecord {
        use chrono::{Duration, TimeZone, Utc};
        let values = Array2::from_shape_fn((lat.len(), lon.len()), |(_, j)| wind(lon[j]));
        let dataset = Dataset::new()
            .with_coord("lon", Variable::from_vec("lon", lon))
            .with_coord("lat", Variable::from_vec("lat", lat))
            .with_var("wind_speed", Variable::from_array2(["lat", "lon"], values));
        let t0 = Utc.with_ymd_and_hms(2021, 3, 1, 6, 0, 0).unwrap();
        crate::io::acquisition::AcquisitionRecord::new(name, "TEST", kind, t0 - Duration::hours(1), t0 + Duration::hours(1))
            .unwrap()
            .with_dataset(dataset)
    }

    fn colocation(footprint: Option<geo::MultiPolygon<f64>>) -> Colocation {
        use chrono::{Duration, TimeZone, Utc};
        let t0 = Utc.with_ymd_and_hms(2021, 3, 1, 6, 0, 0).unwrap();
        Colocation {
            window: crate::types::TimeWindow::new(t0 - Duration::hours(1), t0 + Duration::hours(1)).unwrap(),
            common_footprint: footprint,
            area_km2: None,
            cropped: [None, None],
        }
    }

    #[test]
    fn test_pacific_pair_is_reprojected_in_a_contiguous_frame() {
        use crate::core::common_zone::extract_common_zone;
        use crate::io::config::ColocConfig;
        use crate::types::AcquisitionKind;
        use geo::{polygon, MultiPolygon};

        let _ = env_logger::builder().is_test(true).try_init();
        // 1° grid written on 170..190, 0.5° grid written on -175..-165
        let pacific = grid_record(
            "WSAT_20210301.nc",
            AcquisitionKind::DailyRegularGrid,
            axis(170.0, 1.0, 21),
            axis(0.0, 1.0, 5),
            |lon| lon - 160.0,
        );
        let dateline = grid_record(
            "S1A_IW_OWIH_CC_20210301.nc",
            AcquisitionKind::TruncatedSwath,
            axis(-175.0, 0.5, 21),
            axis(0.0, 0.5, 9),
            |lon| 10.0 + (lon + 175.0),
        );
        let settings = ColocConfig::default().intersection_settings(true).unwrap();
        let intersection = Intersection::new(&pacific, &dateline, settings).unwrap();
        let footprint = MultiPolygon::new(vec![polygon![
            (x: -174.8, y: 0.2),
            (x: -170.2, y: 0.2),
            (x: -170.2, y: 3.8),
            (x: -174.8, y: 3.8),
        ]]);
        let colocation = colocation(Some(footprint));

        let resampled = coloc_resample(&intersection, &colocation, ResamplingMethod::Bilinear).unwrap();
        assert_eq!(resampled.reprojected, Slot::Second);
        assert_eq!(resampled.frame, LongitudeFrame::Positive);

        let expected_lon = axis(170.0, 1.0, 21);
        for slot in [Slot::First, Slot::Second] {
            let lon = resampled.dataset(slot).require("lon").unwrap().values_1d().unwrap();
            assert_eq!(lon, expected_lon);
        }
        let wind = &resampled.dataset(Slot::Second).require("wind_speed").unwrap().data;
        assert_eq!(wind.shape(), &[5, 21]);
        // only 185..190 lies under the finer grid
        assert_eq!(wind.iter().filter(|v| v.is_finite()).count(), 30);
        assert!(wind[[2, 14]].is_nan());
        assert_relative_eq!(wind[[2, 15]], 10.0, epsilon = 1e-9);
        assert_relative_eq!(wind[[4, 20]], 15.0, epsilon = 1e-9);

        // the common zone is handed back with [-180, 180) longitudes
        let zones = extract_common_zone(&intersection, &colocation, &resampled).unwrap();
        for slot in [Slot::First, Slot::Second] {
            let zone = zones.dataset(slot);
            let lon = zone.require("lon").unwrap().values_1d().unwrap();
            assert_eq!(lon, vec![-175.0, -174.0, -173.0, -172.0, -171.0]);
            assert_eq!(zone.require("lat").unwrap().values_1d().unwrap(), vec![0.0, 1.0, 2.0, 3.0]);
        }
        let first = &zones.dataset(Slot::First).require("wind_speed").unwrap().data;
        let second = &zones.dataset(Slot::Second).require("wind_speed").unwrap().data;
        assert_relative_eq!(first[[0, 0]], 25.0, epsilon = 1e-9);
        assert_relative_eq!(first[[3, 4]], 29.0, epsilon = 1e-9);
        assert_relative_eq!(second[[0, 0]], 10.0, epsilon = 1e-9);
        assert_relative_eq!(second[[3, 4]], 14.0, epsilon = 1e-9);
    }

    #[test]
    fn test_straddling_grid_is_wrapped_after_reprojection() {
        use crate::io::config::ColocConfig;
        use crate::types::AcquisitionKind;

        let _ = env_logger::builder().is_test(true).try_init();
        let global = grid_record(
            "ERA_5_20210301.nc",
            AcquisitionKind::DailyRegularGrid,
            axis(-180.0, 10.0, 38),
            axis(0.0, 1.0, 5),
            |_| 8.0,
        );
        let local = grid_record(
            "S1A_IW_OWIH_CC_20210301.nc",
            AcquisitionKind::TruncatedSwath,
            axis(100.0, 5.0, 5),
            axis(0.0, 0.5, 9),
            |lon| lon / 10.0,
        );
        let settings = ColocConfig::default().intersection_settings(true).unwrap();
        let intersection = Intersection::new(&global, &local, settings).unwrap();

        let resampled = coloc_resample(&intersection, &colocation(None), ResamplingMethod::Nearest).unwrap();
        assert_eq!(resampled.reprojected, Slot::Second);
        assert_eq!(resampled.frame, LongitudeFrame::Positive);
        let lon = resampled.dataset(Slot::Second).require("lon").unwrap().values_1d().unwrap();
        assert_eq!(lon.len(), 38);
        assert!(lon.iter().all(|&x| (0.0..360.0).contains(&x)));
        assert_eq!(lon[0], 180.0);
        assert_eq!(lon[37], 190.0);

        // samples at 100, 110 and 120 on every row
        let wind = &resampled.dataset(Slot::Second).require("wind_speed").unwrap().data;
        assert_eq!(wind.iter().filter(|v| v.is_finite()).count(), 15);
        assert_relative_eq!(wind[[0, 28]], 10.0, epsilon = 1e-9);
    }
}
