use crate::composite::Reducer;
use crate::config::RunConfig;
use crate::error::Result;
use crate::roi::Roi;
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "s2-composite")]
#[command(about = "Cloud-masked temporal composite of Sentinel-2 scenes, clipped to a region of interest")]
#[command(version)]
pub struct Args {
    /// Scene GeoTIFFs, or directories containing them
    #[arg(short, long = "scenes", value_name = "PATH", required = true, num_args = 1..)]
    pub scenes: Vec<PathBuf>,

    /// Output composite GeoTIFF path (multi-band float32)
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// TOML run configuration (defaults reproduce the campus run)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// GeoJSON polygon to clip to (overrides the config ROI)
    #[arg(long, value_name = "FILE")]
    pub roi: Option<PathBuf>,

    /// First acquisition date, inclusive (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub start: Option<NaiveDate>,

    /// End of the acquisition window, exclusive (YYYY-MM-DD)
    #[arg(long, value_name = "DATE")]
    pub end: Option<NaiveDate>,

    /// Keep scenes with a cloudy-pixel percentage below this value
    #[arg(long, value_name = "PERCENT")]
    pub max_cloud: Option<f64>,

    /// Temporal reducer
    #[arg(long, value_enum)]
    pub reducer: Option<Reducer>,

    /// Write an 8-bit RGBA quicklook GeoTIFF
    #[arg(long, value_name = "FILE")]
    pub quicklook: Option<PathBuf>,

    /// Write spectral indices (NDVI, NDWI, ...) as a multi-band GeoTIFF
    #[arg(long, value_name = "FILE")]
    pub indices: Option<PathBuf>,

    /// Write the land-cover classification as a paletted byte GeoTIFF
    #[arg(long, value_name = "FILE")]
    pub classes: Option<PathBuf>,

    /// Majority filter radius for the classification, in meters
    #[arg(long, value_name = "METERS")]
    pub focal_radius: Option<f64>,

    /// Write the map descriptor (center, zoom, layers, ROI) as JSON
    #[arg(long, value_name = "FILE")]
    pub map_json: Option<PathBuf>,

    /// Number of threads (default: all available)
    #[arg(short, long, value_name = "N")]
    pub threads: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    /// Config file (or defaults) with command-line overrides applied.
    pub fn run_config(&self) -> Result<RunConfig> {
        let mut config = match &self.config {
            Some(path) => RunConfig::load(path)?,
            None => RunConfig::default(),
        };

        if let Some(path) = &self.roi {
            config.roi = Some(Roi::load(path)?);
        }
        if let Some(start) = self.start {
            config.start_date = start;
        }
        if let Some(end) = self.end {
            config.end_date = end;
        }
        if let Some(max_cloud) = self.max_cloud {
            config.max_cloudy_pixel_percentage = max_cloud;
        }
        if let Some(reducer) = self.reducer {
            config.reducer = reducer;
        }
        if let Some(radius) = self.focal_radius {
            config.classification.focal_radius_m = radius;
        }

        Ok(config)
    }
}
