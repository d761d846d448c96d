//! Footprints, planar areas and longitude conventions.

use crate::core::selection::extract_times;
use crate::dataset::{union_dims, Dataset};
use crate::io::acquisition::PreparedAcquisition;
use crate::types::{ColocError, ColocResult, TimeWindow};
use geo::{Area, ConvexHull, Coord, Geometry, LineString, MapCoords, MultiPoint, MultiPolygon, Point, Polygon};
use std::f64::consts::FRAC_PI_4;
use wkt::{ToWkt, TryFromWkt};

/// WGS84 semi-major axis used by the spherical mercator projection (EPSG:3857)
const EARTH_RADIUS_M: f64 = 6_378_137.0;

/// Latitude limit of the square mercator world
const MAX_MERCATOR_LATITUDE: f64 = 85.051_128_779_806_59;

pub fn empty_polygon() -> Polygon<f64> {
    Polygon::new(LineString::new(Vec::new()), Vec::new())
}

pub fn is_empty_polygon(polygon: &Polygon<f64>) -> bool {
    polygon.exterior().0.is_empty()
}

/// Convex hull of the valid longitude/latitude samples of `dataset`.
///
/// With a time window, the grid is first restricted to samples inside it.
/// Regular grids (independent 1D axes) use the product of both axes; other
/// layouts pair samples element-wise. Pairs with a non-finite member are
/// discarded, and no valid pair yields an empty polygon.
pub fn footprint_from_dataset(
    dataset: &Dataset,
    lon_name: &str,
    lat_name: &str,
    time_name: &str,
    window: Option<&TimeWindow>,
) -> ColocResult<Polygon<f64>> {
    let restricted;
    let dataset = match window {
        Some(window) => {
            restricted = extract_times(dataset, time_name, window)?;
            &restricted
        }
        None => dataset,
    };
    let lon = dataset.require(lon_name)?;
    let lat = dataset.require(lat_name)?;

    let points: Vec<Point<f64>> = if lon.dims.len() == 1 && lat.dims.len() == 1 && lon.dims != lat.dims {
        // Corners are enough: the hull of an axis product is its bounding rectangle
        match (lon.finite_min(), lon.finite_max(), lat.finite_min(), lat.finite_max()) {
            (Some(x0), Some(x1), Some(y0), Some(y1)) => vec![
                Point::new(x0, y0),
                Point::new(x1, y0),
                Point::new(x1, y1),
                Point::new(x0, y1),
            ],
            _ => Vec::new(),
        }
    } else {
        let (dims, shape) = union_dims(&lon.dims, lon.data.shape(), &lat.dims, lat.data.shape());
        let lons = lon.broadcast_to(&dims, &shape)?;
        let lats = lat.broadcast_to(&dims, &shape)?;
        lons.iter()
            .zip(lats.iter())
            .filter(|(x, y)| x.is_finite() && y.is_finite())
            .map(|(&x, &y)| Point::new(x, y))
            .collect()
    };

    if points.is_empty() {
        return Ok(empty_polygon());
    }
    Ok(MultiPoint::from(points).convex_hull())
}

/// Footprint of a prepared acquisition's grid, or of `subset` when given
pub fn footprint_from_grid(
    acquisition: &PreparedAcquisition<'_>,
    subset: Option<&Dataset>,
    window: Option<&TimeWindow>,
) -> ColocResult<Polygon<f64>> {
    let dataset = match subset {
        Some(dataset) => dataset,
        None => acquisition.require_dataset()?,
    };
    footprint_from_dataset(
        dataset,
        acquisition.longitude_name(),
        acquisition.latitude_name(),
        acquisition.time_name(),
        window,
    )
}

fn web_mercator(coord: Coord<f64>) -> Coord<f64> {
    let lat = coord.y.clamp(-MAX_MERCATOR_LATITUDE, MAX_MERCATOR_LATITUDE);
    Coord {
        x: EARTH_RADIUS_M * coord.x.to_radians(),
        y: EARTH_RADIUS_M * (FRAC_PI_4 + lat.to_radians() / 2.0).tan().ln(),
    }
}

/// Planar area in km² after projecting geographic vertices to EPSG:3857.
///
/// Points and lines have zero area; collections are rejected.
pub fn polygon_area_km2(geometry: &Geometry<f64>) -> ColocResult<f64> {
    let area_m2 = match geometry {
        Geometry::Polygon(polygon) => polygon.map_coords(web_mercator).unsigned_area(),
        Geometry::MultiPolygon(polygons) => polygons.map_coords(web_mercator).unsigned_area(),
        Geometry::Rect(rect) => rect.to_polygon().map_coords(web_mercator).unsigned_area(),
        Geometry::Triangle(triangle) => triangle.to_polygon().map_coords(web_mercator).unsigned_area(),
        Geometry::Point(_)
        | Geometry::MultiPoint(_)
        | Geometry::Line(_)
        | Geometry::LineString(_)
        | Geometry::MultiLineString(_) => 0.0,
        Geometry::GeometryCollection(_) => {
            return Err(ColocError::GeometryType(
                "area from a geometry collection can't be computed".to_string(),
            ))
        }
    };
    Ok(area_m2 / 1e6)
}

pub fn multipolygon_area_km2(polygons: &MultiPolygon<f64>) -> ColocResult<f64> {
    polygon_area_km2(&Geometry::MultiPolygon(polygons.clone()))
}

pub fn to_wkt(geometry: &Geometry<f64>) -> String {
    match geometry {
        Geometry::Polygon(polygon) if is_empty_polygon(polygon) => "POLYGON EMPTY".to_string(),
        other => other.wkt_string(),
    }
}

pub fn parse_wkt(text: &str) -> ColocResult<Geometry<f64>> {
    Geometry::<f64>::try_from_wkt_str(text)
        .map_err(|e| ColocError::InvalidGeometry(format!("cannot parse '{}': {:?}", text, e)))
}

/// Parse a WKT footprint that must be polygonal (or empty)
pub fn parse_polygonal_wkt(text: &str) -> ColocResult<MultiPolygon<f64>> {
    match parse_wkt(text)? {
        Geometry::Polygon(polygon) => Ok(MultiPolygon::new(vec![polygon])),
        Geometry::MultiPolygon(polygons) => Ok(polygons),
        Geometry::GeometryCollection(collection) if collection.0.is_empty() => {
            Ok(MultiPolygon::new(Vec::new()))
        }
        other => Err(ColocError::GeometryType(format!(
            "expected a polygonal footprint, got {:?}",
            other
        ))),
    }
}

/// Longitude convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LongitudeFrame {
    /// [-180, 180)
    Signed,
    /// [0, 360)
    Positive,
}

impl LongitudeFrame {
    pub fn wrap(&self, lon: f64) -> f64 {
        match self {
            LongitudeFrame::Signed => (lon + 180.0).rem_euclid(360.0) - 180.0,
            LongitudeFrame::Positive => lon.rem_euclid(360.0),
        }
    }

    /// Widest hole left between consecutive wrapped samples of `axis`
    fn largest_gap(&self, axis: &[f64]) -> f64 {
        let mut wrapped: Vec<f64> = axis
            .iter()
            .filter(|v| v.is_finite())
            .map(|&v| self.wrap(v))
            .collect();
        wrapped.sort_by(f64::total_cmp);
        wrapped
            .windows(2)
            .map(|pair| pair[1] - pair[0])
            .fold(0.0, f64::max)
    }

    /// Frame keeping every axis contiguous; `preferred` wins ties
    pub fn contiguous_for(axes: &[&[f64]], preferred: LongitudeFrame) -> LongitudeFrame {
        let other = match preferred {
            LongitudeFrame::Signed => LongitudeFrame::Positive,
            LongitudeFrame::Positive => LongitudeFrame::Signed,
        };
        let gap = |frame: LongitudeFrame| {
            axes.iter()
                .map(|axis| frame.largest_gap(axis))
                .fold(0.0, f64::max)
        };
        if gap(other) < gap(preferred) {
            other
        } else {
            preferred
        }
    }
}

/// True when an axis has negative values and values beyond 180°
pub fn straddles_antimeridian(axis: &[f64]) -> bool {
    let finite = axis.iter().copied().filter(|v| v.is_finite());
    let (min, max) = finite.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    min < 0.0 && max > 180.0
}

pub fn shift_longitudes(polygons: &MultiPolygon<f64>, frame: LongitudeFrame) -> MultiPolygon<f64> {
    polygons.map_coords(|c| Coord {
        x: frame.wrap(c.x),
        y: c.y,
    })
}
