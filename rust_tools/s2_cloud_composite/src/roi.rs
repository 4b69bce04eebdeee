use crate::error::{CompositeError, Result};
use crate::io::RasterMetadata;
use geo::{Centroid, Contains, Coord, LineString, Point, Polygon};
use geojson::{GeoJson, Geometry, Value};
use log::{debug, info};
use ndarray::Array2;
use rayon::prelude::*;
use std::fs;
use std::path::Path;

/// Region of interest: a single polygon ring in WGS84 lon/lat.
///
/// The ring does not need to repeat its first vertex; it is closed
/// implicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct Roi {
    polygon: Polygon<f64>,
}

impl Roi {
    /// Build from an ordered ring of `(lon, lat)` pairs.
    pub fn from_ring(ring: Vec<(f64, f64)>) -> Result<Self> {
        let mut distinct: Vec<(f64, f64)> = Vec::with_capacity(ring.len());
        for &(lon, lat) in &ring {
            if !lon.is_finite() || !lat.is_finite() {
                return Err(CompositeError::InvalidRoi(format!(
                    "non-finite coordinate ({}, {})",
                    lon, lat
                )));
            }
            if !distinct.contains(&(lon, lat)) {
                distinct.push((lon, lat));
            }
        }
        if distinct.len() < 3 {
            return Err(CompositeError::InvalidRoi(format!(
                "ring needs at least 3 distinct vertices, got {}",
                distinct.len()
            )));
        }

        let exterior: LineString<f64> = ring.into_iter().map(|(x, y)| Coord { x, y }).collect();
        Ok(Self {
            polygon: Polygon::new(exterior, vec![]),
        })
    }

    /// Parse a GeoJSON Polygon, Feature or FeatureCollection. Only the exterior
    /// ring of the first polygon is used.
    pub fn from_geojson_str(text: &str) -> Result<Self> {
        let geojson: GeoJson = text.parse()?;
        let geometry = match geojson {
            GeoJson::Geometry(g) => Some(g),
            GeoJson::Feature(f) => f.geometry,
            GeoJson::FeatureCollection(fc) => {
                fc.features.into_iter().find_map(|f| f.geometry.filter(is_polygonal))
            }
        }
        .ok_or_else(|| CompositeError::InvalidRoi("no geometry found".to_string()))?;

        let rings = match geometry.value {
            Value::Polygon(rings) => rings,
            Value::MultiPolygon(mut polygons) if !polygons.is_empty() => polygons.remove(0),
            _ => {
                return Err(CompositeError::InvalidRoi(
                    "expected a Polygon geometry".to_string(),
                ))
            }
        };

        if rings.len() > 1 {
            debug!("Ignoring {} interior ring(s) of the ROI", rings.len() - 1);
        }
        let exterior = rings
            .into_iter()
            .next()
            .ok_or_else(|| CompositeError::InvalidRoi("polygon has no rings".to_string()))?;

        let ring = exterior
            .into_iter()
            .map(|position| match position.as_slice() {
                [lon, lat, ..] => Ok((*lon, *lat)),
                _ => Err(CompositeError::InvalidRoi(
                    "position with fewer than 2 coordinates".to_string(),
                )),
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_ring(ring)
    }

    pub fn load(path: &Path) -> Result<Self> {
        info!("Reading ROI: {}", path.display());
        let text = fs::read_to_string(path)?;
        Self::from_geojson_str(&text)
    }

    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    /// Exterior ring as given (without the implicit closing vertex).
    pub fn exterior(&self) -> Vec<(f64, f64)> {
        let coords: Vec<(f64, f64)> = self.polygon.exterior().coords().map(|c| (c.x, c.y)).collect();
        match coords.split_last() {
            Some((_, rest)) => rest.to_vec(),
            None => coords,
        }
    }

    /// Map center as `(lon, lat)`.
    pub fn centroid(&self) -> Option<(f64, f64)> {
        self.polygon.centroid().map(|p| (p.x(), p.y()))
    }

    pub fn to_geojson(&self) -> Geometry {
        let ring: Vec<Vec<f64>> = self.exterior().into_iter().map(|(x, y)| vec![x, y]).collect();
        Geometry::new(Value::Polygon(vec![ring]))
    }
}

fn is_polygonal(geometry: &Geometry) -> bool {
    matches!(geometry.value, Value::Polygon(_) | Value::MultiPolygon(_))
}

/// Rasterize `polygon` (already in the raster's CRS) onto `grid`.
///
/// A pixel is inside when its center is strictly inside the polygon.
pub fn roi_pixel_mask(polygon: &Polygon<f64>, grid: &RasterMetadata) -> Result<Array2<bool>> {
    let rows: Vec<Vec<bool>> = (0..grid.height)
        .into_par_iter()
        .map(|row| {
            (0..grid.width)
                .map(|col| {
                    let (x, y) = grid.pixel_center(row, col);
                    polygon.contains(&Point::new(x, y))
                })
                .collect()
        })
        .collect();

    let flat: Vec<bool> = rows.into_iter().flatten().collect();
    let mask = Array2::from_shape_vec((grid.height, grid.width), flat)?;

    debug!(
        "ROI covers {}/{} pixels",
        mask.iter().filter(|inside| **inside).count(),
        mask.len()
    );
    Ok(mask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::BoundingRect;

    const CAMPUS: &str = r#"{
        "type": "Polygon",
        "coordinates": [[
            [80.01710357666015, 23.173962177472703],
            [80.03259601593017, 23.165361215115187],
            [80.03654422760009, 23.172502420044232],
            [80.026802444458, 23.181694681000845],
            [80.01542987823485, 23.176960548201308]
        ]]
    }"#;

    fn square() -> Roi {
        Roi::from_ring(vec![(0.0, 0.0), (4.0, 0.0), (4.0, 4.0), (0.0, 4.0)]).unwrap()
    }

    #[test]
    fn test_parse_open_ring() {
        let roi = Roi::from_geojson_str(CAMPUS).unwrap();
        assert_eq!(roi.exterior().len(), 5);
        // Closed implicitly
        let ring = roi.polygon().exterior();
        assert_eq!(ring.0.first(), ring.0.last());
    }

    #[test]
    fn test_parse_feature_collection() {
        let text = format!(
            r#"{{"type":"FeatureCollection","features":[
                {{"type":"Feature","properties":{{}},"geometry":{{"type":"Point","coordinates":[1,2]}}}},
                {{"type":"Feature","properties":{{}},"geometry":{}}}
            ]}}"#,
            CAMPUS
        );
        let roi = Roi::from_geojson_str(&text).unwrap();
        assert_eq!(roi, Roi::from_geojson_str(CAMPUS).unwrap());
    }

    #[test]
    fn test_reject_point() {
        let err = Roi::from_geojson_str(r#"{"type":"Point","coordinates":[80.0,23.0]}"#).unwrap_err();
        assert!(matches!(err, CompositeError::InvalidRoi(_)));
    }

    #[test]
    fn test_reject_degenerate_ring() {
        let err = Roi::from_ring(vec![(0.0, 0.0), (1.0, 1.0), (0.0, 0.0)]).unwrap_err();
        assert!(matches!(err, CompositeError::InvalidRoi(_)));
    }

    #[test]
    fn test_centroid_of_square() {
        let (x, y) = square().centroid().unwrap();
        assert!((x - 2.0).abs() < 1e-12);
        assert!((y - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_campus_centroid_inside_envelope() {
        let roi = Roi::from_geojson_str(CAMPUS).unwrap();
        let (lon, lat) = roi.centroid().unwrap();
        let env = roi.polygon().bounding_rect().unwrap();
        assert!(lon > env.min().x && lon < env.max().x);
        assert!(lat > env.min().y && lat < env.max().y);
    }

    #[test]
    fn test_geojson_roundtrip_keeps_ring() {
        let roi = square();
        let back = Roi::from_geojson_str(&GeoJson::Geometry(roi.to_geojson()).to_string()).unwrap();
        assert_eq!(back, roi);
    }

    #[test]
    fn test_pixel_mask_uses_pixel_centers() {
        // 4x4 grid of unit pixels with origin at (0, 4), north-up
        let grid = RasterMetadata {
            geotransform: [0.0, 1.0, 0.0, 4.0, 0.0, -1.0],
            ..RasterMetadata::for_tests(4, 4)
        };
        // Triangle covering the lower-left half
        let roi = Roi::from_ring(vec![(0.0, 0.0), (4.0, 0.0), (0.0, 4.0)]).unwrap();
        let mask = roi_pixel_mask(roi.polygon(), &grid).unwrap();

        assert!(mask[[3, 0]]);
        assert!(mask[[2, 0]]);
        assert!(mask[[3, 2]]);
        assert!(!mask[[0, 3]]);
        assert!(!mask[[1, 3]]);
        // Center (1.5, 2.5) lies exactly on the hypotenuse x + y = 4
        assert!(!mask[[1, 1]]);
    }
}
