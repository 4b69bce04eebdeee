use crate::cog;
use crate::composite::Reducer;
use crate::error::{CompositeError, Result};
use crate::roi::Roi;
use chrono::NaiveDate;
use log::{debug, info};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Campus boundary used when no ROI is supplied.
pub const DEFAULT_ROI: [[f64; 2]; 5] = [
    [80.01710357666015, 23.173962177472703],
    [80.03259601593017, 23.165361215115187],
    [80.03654422760009, 23.172502420044232],
    [80.026802444458, 23.181694681000845],
    [80.01542987823485, 23.176960548201308],
];

/// All parameters of one composite run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Collection label recorded in the output metadata
    pub dataset: String,
    /// First acquisition date kept (inclusive)
    pub start_date: NaiveDate,
    /// Acquisitions on or after this date are dropped
    pub end_date: NaiveDate,
    /// Scenes must report strictly less cloud than this
    pub max_cloudy_pixel_percentage: f64,
    pub cloud_metadata_key: String,
    pub qa_band: String,
    pub reflectance_scale: f64,
    pub reducer: Reducer,
    /// Band names used when a scene file carries no band descriptions
    pub band_order: Vec<String>,
    /// GeoJSON file holding the ROI polygon
    pub roi_geojson: Option<PathBuf>,
    #[serde(skip)]
    pub roi: Option<Roi>,
    pub visualization: VisConfig,
    pub classification: ClassifyConfig,
    pub map: MapConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VisConfig {
    pub bands: Vec<String>,
    pub min: f64,
    pub max: f64,
    pub layer_name: String,
    pub boundary_layer_name: String,
}

/// Land-cover classification of the composite.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassifyConfig {
    /// Radius of the circular majority filter, in meters (0 disables it)
    pub focal_radius_m: f64,
    pub layer_name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MapConfig {
    pub zoom: u8,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub compression: String,
    pub tile_size: usize,
    pub overviews: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            dataset: "COPERNICUS/S2_SR_HARMONIZED".to_string(),
            start_date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap_or_default(),
            end_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap_or_default(),
            max_cloudy_pixel_percentage: 20.0,
            cloud_metadata_key: "CLOUDY_PIXEL_PERCENTAGE".to_string(),
            qa_band: "QA60".to_string(),
            reflectance_scale: 10000.0,
            reducer: Reducer::Mean,
            band_order: [
                "B1", "B2", "B3", "B4", "B5", "B6", "B7", "B8", "B8A", "B9", "B11", "B12", "QA60",
            ]
            .iter()
            .map(|b| b.to_string())
            .collect(),
            roi_geojson: None,
            roi: None,
            visualization: VisConfig::default(),
            classification: ClassifyConfig::default(),
            map: MapConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Default for VisConfig {
    fn default() -> Self {
        Self {
            bands: vec!["B4".to_string(), "B3".to_string(), "B2".to_string()],
            min: 0.0,
            max: 0.3,
            layer_name: "Campus RGB".to_string(),
            boundary_layer_name: "Campus Boundary".to_string(),
        }
    }
}

impl Default for ClassifyConfig {
    fn default() -> Self {
        Self {
            focal_radius_m: 12.0,
            layer_name: "Land Cover".to_string(),
        }
    }
}

impl Default for MapConfig {
    fn default() -> Self {
        Self { zoom: 16 }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            compression: "DEFLATE".to_string(),
            tile_size: 256,
            overviews: true,
        }
    }
}

impl RunConfig {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a TOML config file; `roi_geojson` is resolved relative to it.
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading config: {}", path.display());
        let text = fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;

        if let Some(roi_path) = config.roi_geojson.take() {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            config.roi = Some(Roi::load(&base.join(roi_path))?);
        }

        debug!("Config: {:?}", config);
        Ok(config)
    }

    /// The configured ROI, or the built-in campus polygon.
    pub fn roi(&self) -> Result<Roi> {
        if let Some(roi) = &self.roi {
            return Ok(roi.clone());
        }
        match &self.roi_geojson {
            Some(path) => Roi::load(path),
            None => Roi::from_ring(DEFAULT_ROI.iter().map(|p| (p[0], p[1])).collect()),
        }
    }

    /// Check the run parameters and resolve the ROI once, so a bad polygon
    /// fails before any scene is opened.
    pub fn validate(&self) -> Result<Roi> {
        if self.end_date <= self.start_date {
            return Err(CompositeError::InvalidConfig(format!(
                "end date {} must be after start date {}",
                self.end_date, self.start_date
            )));
        }
        if !(self.reflectance_scale > 0.0) {
            return Err(CompositeError::InvalidConfig(format!(
                "reflectance scale must be positive, got {}",
                self.reflectance_scale
            )));
        }
        if self.qa_band.is_empty() {
            return Err(CompositeError::InvalidConfig("qa_band is empty".to_string()));
        }

        let vis = &self.visualization;
        if vis.bands.len() != 3 {
            return Err(CompositeError::InvalidConfig(format!(
                "visualization needs exactly 3 bands, got {:?}",
                vis.bands
            )));
        }
        if vis.max <= vis.min {
            return Err(CompositeError::InvalidConfig(format!(
                "visualization max {} must exceed min {}",
                vis.max, vis.min
            )));
        }
        if self.map.zoom > 24 {
            return Err(CompositeError::InvalidConfig(format!(
                "zoom {} out of range 0..=24",
                self.map.zoom
            )));
        }

        if !(self.classification.focal_radius_m >= 0.0) {
            return Err(CompositeError::InvalidConfig(format!(
                "focal radius must be zero or positive, got {}",
                self.classification.focal_radius_m
            )));
        }

        cog::validate_compression(&self.output.compression)?;
        cog::validate_tile_size(self.output.tile_size)?;

        self.roi()
    }
}
