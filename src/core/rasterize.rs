//! Burning footprints into boolean masks on regular lat/lon grids.

use crate::dataset::{Dataset, Mask};
use crate::io::acquisition::PreparedAcquisition;
use crate::types::{ColocError, ColocResult};
use geo::{BoundingRect, Coord, Intersects, MultiPolygon, Point, Polygon, Rect};
use ndarray::Array2;

/// Pixel selection rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BurnRule {
    /// Pixel centre inside the geometry (boundary included)
    Centre,
    /// Any pixel touching the geometry
    AllTouched,
}

/// Cell extents of a 1D coordinate axis, each sample spanning `[v, v + step]`
#[derive(Debug, Clone)]
pub struct AxisCells {
    pub dim: String,
    pub values: Vec<f64>,
    pub step: f64,
}

impl AxisCells {
    /// Axis read from a 1D coordinate; `step` comes from its first two samples
    pub fn from_coordinate(dataset: &Dataset, name: &str) -> ColocResult<Self> {
        let variable = dataset.require(name)?;
        if variable.dims.len() != 1 {
            return Err(ColocError::GeometryType(format!(
                "coordinate {} is not a 1D regular-grid axis (dimensions {:?})",
                name, variable.dims
            )));
        }
        let values = variable.values_1d()?;
        if values.len() < 2 {
            return Err(ColocError::Processing(format!(
                "cannot derive a pixel spacing from {} sample(s) of {}",
                values.len(),
                name
            )));
        }
        let step = values[1] - values[0];
        if !step.is_finite() || step == 0.0 {
            return Err(ColocError::Processing(format!(
                "invalid pixel spacing {} along {}",
                step, name
            )));
        }
        Ok(Self {
            dim: variable.dims[0].clone(),
            values,
            step,
        })
    }

    /// Same axis with a positive resolution, anchored at each sample's lower bound
    pub fn with_positive_step(mut self) -> Self {
        self.step = self.step.abs();
        self
    }

    fn span(&self, index: usize) -> (f64, f64) {
        let a = self.values[index];
        let b = a + self.step;
        (a.min(b), a.max(b))
    }

    fn candidates(&self, lo: f64, hi: f64, rule: BurnRule) -> Vec<usize> {
        (0..self.values.len())
            .filter(|&i| {
                let (a, b) = self.span(i);
                match rule {
                    BurnRule::Centre => {
                        let centre = (a + b) / 2.0;
                        centre >= lo && centre <= hi
                    }
                    BurnRule::AllTouched => b >= lo && a <= hi,
                }
            })
            .collect()
    }
}

/// Boolean raster `[lat, lon]` of the cells selected by `rule`
pub fn burn(lon: &AxisCells, lat: &AxisCells, geometry: &MultiPolygon<f64>, rule: BurnRule) -> ColocResult<Mask> {
    let mut raster = Array2::from_elem((lat.values.len(), lon.values.len()), false);
    if let Some(bounds) = geometry.bounding_rect() {
        let rows = lat.candidates(bounds.min().y, bounds.max().y, rule);
        let cols = lon.candidates(bounds.min().x, bounds.max().x, rule);
        for &i in &rows {
            let (y0, y1) = lat.span(i);
            for &j in &cols {
                let (x0, x1) = lon.span(j);
                raster[[i, j]] = match rule {
                    BurnRule::Centre => geometry.intersects(&Point::new((x0 + x1) / 2.0, (y0 + y1) / 2.0)),
                    BurnRule::AllTouched => {
                        geometry.intersects(&Rect::new(Coord { x: x0, y: y0 }, Coord { x: x1, y: y1 }))
                    }
                };
            }
        }
    }
    Mask::new(&[lat.dim.as_str(), lon.dim.as_str()], raster.into_dyn())
}

/// Rasterize `polygon` on the regular grid of `acquisition` (pixel centre rule).
///
/// Swaths have no regular grid and are rejected.
pub fn rasterize_polygon_on_grid(
    acquisition: &PreparedAcquisition<'_>,
    dataset: &Dataset,
    polygon: &Polygon<f64>,
) -> ColocResult<Mask> {
    if !acquisition.kind().is_regular_grid() {
        return Err(ColocError::GeometryType(format!(
            "{} is a {} acquisition, rasterization needs a regular grid",
            acquisition.product_name(),
            acquisition.kind()
        )));
    }
    let lon = AxisCells::from_coordinate(dataset, acquisition.longitude_name())?.with_positive_step();
    let lat = AxisCells::from_coordinate(dataset, acquisition.latitude_name())?.with_positive_step();
    burn(&lon, &lat, &MultiPolygon::new(vec![polygon.clone()]), BurnRule::Centre)
}

/// Mask of every grid cell touched by `geometry`, using the grid's own signed spacing
pub fn geometry_mask_on_grid(
    dataset: &Dataset,
    lon_name: &str,
    lat_name: &str,
    geometry: &MultiPolygon<f64>,
) -> ColocResult<Mask> {
    let lon = AxisCells::from_coordinate(dataset, lon_name)?;
    let lat = AxisCells::from_coordinate(dataset, lat_name)?;
    burn(&lon, &lat, geometry, BurnRule::AllTouched)
}
