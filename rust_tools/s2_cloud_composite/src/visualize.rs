use crate::classify::{self, LandCover, LegendEntry};
use crate::composite::Composite;
use crate::config::{RunConfig, VisConfig};
use crate::error::{CompositeError, Result};
use crate::io::{self, RasterMetadata};
use crate::roi::Roi;
use gdal::raster::ColorInterpretation;
use log::info;
use ndarray::{Array2, Zip};
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Linear stretch of `[min, max]` onto `0..=255`, clamped. `NaN` maps to 0.
pub fn stretch(value: f32, min: f64, max: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    let scaled = (f64::from(value) - min) / (max - min) * 255.0;
    scaled.round().clamp(0.0, 255.0) as u8
}

/// 8-bit RGBA rendering of the three visualization bands.
///
/// Alpha is opaque only where all three bands hold data.
pub fn render_rgb(composite: &Composite, vis: &VisConfig) -> Result<[Array2<u8>; 4]> {
    let channel = |name: &String| {
        composite.band(name).ok_or_else(|| CompositeError::MissingBand {
            band: name.clone(),
            source_name: "composite".to_string(),
        })
    };
    let (red, green, blue) = match vis.bands.as_slice() {
        [r, g, b] => (channel(r)?, channel(g)?, channel(b)?),
        _ => {
            return Err(CompositeError::InvalidConfig(format!(
                "visualization needs exactly 3 bands, got {:?}",
                vis.bands
            )))
        }
    };

    let to_bytes = |band: &Array2<f32>| band.mapv(|v| stretch(v, vis.min, vis.max));
    let alpha = Zip::from(red)
        .and(green)
        .and(blue)
        .map_collect(|r, g, b| if r.is_nan() || g.is_nan() || b.is_nan() { 0 } else { 255 });

    Ok([to_bytes(red), to_bytes(green), to_bytes(blue), alpha])
}

/// Write an RGBA quicklook GeoTIFF
pub fn write_quicklook(
    path: &Path,
    rgba: &[Array2<u8>; 4],
    grid: &RasterMetadata,
    options: Vec<String>,
) -> Result<()> {
    let mut dataset = io::create_output_dataset::<u8>(path, grid, 4, options)?;

    let interpretations = [
        ColorInterpretation::RedBand,
        ColorInterpretation::GreenBand,
        ColorInterpretation::BlueBand,
        ColorInterpretation::AlphaBand,
    ];

    for (i, (data, interpretation)) in rgba.iter().zip(interpretations).enumerate() {
        io::write_band(&mut dataset, i + 1, data)?;
        dataset.rasterband(i + 1)?.set_color_interpretation(interpretation)?;
    }

    info!("Wrote quicklook: {}", path.display());
    Ok(())
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MapLayer {
    Raster {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        bands: Vec<String>,
        min: f64,
        max: f64,
    },
    Classes {
        name: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<String>,
        min: u8,
        max: u8,
        palette: Vec<String>,
    },
    Boundary {
        name: String,
    },
}

/// What a map viewer needs to show the composite: where to look and what
/// to draw.
#[derive(Debug, Clone, Serialize)]
pub struct MapDescriptor {
    pub dataset: String,
    /// `[lat, lon]`
    pub center: [f64; 2],
    pub zoom: u8,
    pub layers: Vec<MapLayer>,
    pub geojson: geojson::Geometry,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub legend: Vec<LegendEntry>,
}

impl MapDescriptor {
    pub fn new(config: &RunConfig, roi: &Roi, raster_path: Option<&Path>) -> Result<Self> {
        let (lon, lat) = roi
            .centroid()
            .ok_or_else(|| CompositeError::InvalidRoi("ROI has no centroid".to_string()))?;
        let vis = &config.visualization;

        Ok(Self {
            dataset: config.dataset.clone(),
            center: [lat, lon],
            zoom: config.map.zoom,
            layers: vec![
                MapLayer::Raster {
                    name: vis.layer_name.clone(),
                    path: raster_path.map(|p| p.display().to_string()),
                    bands: vis.bands.clone(),
                    min: vis.min,
                    max: vis.max,
                },
                MapLayer::Boundary {
                    name: vis.boundary_layer_name.clone(),
                },
            ],
            geojson: roi.to_geojson(),
            legend: Vec::new(),
        })
    }

    /// Add the land-cover layer (below the boundary) and its legend.
    pub fn with_classes(mut self, config: &RunConfig, classes_path: Option<&Path>) -> Self {
        let layer = MapLayer::Classes {
            name: config.classification.layer_name.clone(),
            path: classes_path.map(|p| p.display().to_string()),
            min: LandCover::DeepWater.value(),
            max: LandCover::BareSoil.value(),
            palette: LandCover::ALL.iter().map(|class| class.color()).collect(),
        };
        let at = self.layers.len().saturating_sub(1);
        self.layers.insert(at, layer);
        self.legend = classify::legend();
        self
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!("Wrote map descriptor: {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::composite::Reducer;
    use ndarray::arr2;

    #[test]
    fn test_stretch_endpoints_and_clamp() {
        assert_eq!(stretch(0.0, 0.0, 0.3), 0);
        assert_eq!(stretch(0.3, 0.0, 0.3), 255);
        assert_eq!(stretch(0.15, 0.0, 0.3), 128);
        assert_eq!(stretch(-0.1, 0.0, 0.3), 0);
        assert_eq!(stretch(0.9, 0.0, 0.3), 255);
        assert_eq!(stretch(f32::NAN, 0.0, 0.3), 0);
    }

    fn composite() -> Composite {
        Composite {
            bands: vec![
                ("B2".to_string(), arr2(&[[0.0, 0.1]])),
                ("B3".to_string(), arr2(&[[0.15, 0.2]])),
                ("B4".to_string(), arr2(&[[0.3, f32::NAN]])),
            ],
            grid: RasterMetadata::for_tests(2, 1),
            scene_ids: vec![],
            reducer: Reducer::Mean,
        }
    }

    #[test]
    fn test_render_rgb_order_and_alpha() {
        let [r, g, b, a] = render_rgb(&composite(), &VisConfig::default()).unwrap();
        assert_eq!(r, arr2(&[[255, 0]]));
        assert_eq!(g, arr2(&[[128, 170]]));
        assert_eq!(b, arr2(&[[0, 85]]));
        assert_eq!(a, arr2(&[[255, 0]]));
    }

    #[test]
    fn test_render_rgb_missing_band() {
        let vis = VisConfig {
            bands: vec!["B8".to_string(), "B4".to_string(), "B3".to_string()],
            ..VisConfig::default()
        };
        let err = render_rgb(&composite(), &vis).unwrap_err();
        assert!(matches!(err, CompositeError::MissingBand { ref band, .. } if band == "B8"));
    }

    #[test]
    fn test_map_descriptor_json() {
        let config = RunConfig::default();
        let roi = config.roi().unwrap();
        let descriptor = MapDescriptor::new(&config, &roi, Some(Path::new("out/rgb.tif"))).unwrap();
        let json = serde_json::to_value(&descriptor).unwrap();

        assert_eq!(json["zoom"], 16);
        let center = json["center"].as_array().unwrap();
        assert!((center[0].as_f64().unwrap() - 23.17).abs() < 0.01);
        assert!((center[1].as_f64().unwrap() - 80.03).abs() < 0.01);
        assert_eq!(json["layers"][0]["kind"], "raster");
        assert_eq!(json["layers"][0]["name"], "Campus RGB");
        assert_eq!(json["layers"][0]["bands"][0], "B4");
        assert_eq!(json["layers"][1]["kind"], "boundary");
        assert_eq!(json["layers"][1]["name"], "Campus Boundary");
        assert_eq!(json["geojson"]["type"], "Polygon");
        assert_eq!(json["geojson"]["coordinates"][0].as_array().unwrap().len(), 5);
        assert!(json.get("legend").is_none());
    }

    #[test]
    fn test_map_descriptor_with_classes() {
        let config = RunConfig::default();
        let roi = config.roi().unwrap();
        let descriptor = MapDescriptor::new(&config, &roi, None)
            .unwrap()
            .with_classes(&config, Some(Path::new("out/classes.tif")));
        let json = serde_json::to_value(&descriptor).unwrap();

        let layers = json["layers"].as_array().unwrap();
        assert_eq!(layers.len(), 3);
        assert_eq!(layers[1]["kind"], "classes");
        assert_eq!(layers[1]["name"], "Land Cover");
        assert_eq!(layers[1]["max"], 7);
        assert_eq!(layers[1]["palette"][2], "#006400");
        assert_eq!(layers[2]["kind"], "boundary");

        assert_eq!(json["legend"].as_array().unwrap().len(), 8);
        assert_eq!(json["legend"][1]["name"], "Wetland/Shallow Water");
        assert_eq!(json["legend"][5]["color"], "#cd853f");
    }
}
