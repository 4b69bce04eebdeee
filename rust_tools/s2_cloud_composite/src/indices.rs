//! Spectral indices over a reflectance composite.
//!
//! All formulas expect fractional reflectance (0..1). `NaN` inputs and zero
//! denominators produce `NaN`.

use crate::composite::Composite;
use log::{info, warn};
use ndarray::{Array2, Zip};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectralIndex {
    Ndvi,
    Ndwi,
    Ndbi,
    Evi,
    Savi,
    Ndre,
    Mndwi,
    Bsi,
    Brightness,
}

const SAVI_L: f64 = 0.5;

impl SpectralIndex {
    pub const ALL: [SpectralIndex; 9] = [
        SpectralIndex::Ndvi,
        SpectralIndex::Ndwi,
        SpectralIndex::Ndbi,
        SpectralIndex::Evi,
        SpectralIndex::Savi,
        SpectralIndex::Ndre,
        SpectralIndex::Mndwi,
        SpectralIndex::Bsi,
        SpectralIndex::Brightness,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SpectralIndex::Ndvi => "NDVI",
            SpectralIndex::Ndwi => "NDWI",
            SpectralIndex::Ndbi => "NDBI",
            SpectralIndex::Evi => "EVI",
            SpectralIndex::Savi => "SAVI",
            SpectralIndex::Ndre => "NDRE",
            SpectralIndex::Mndwi => "MNDWI",
            SpectralIndex::Bsi => "BSI",
            SpectralIndex::Brightness => "brightness",
        }
    }

    /// Input bands, in the order `evaluate` receives them.
    pub fn inputs(&self) -> &'static [&'static str] {
        match self {
            SpectralIndex::Ndvi => &["B8", "B4"],
            SpectralIndex::Ndwi => &["B3", "B8"],
            SpectralIndex::Ndbi => &["B11", "B8"],
            SpectralIndex::Evi => &["B8", "B4", "B2"],
            SpectralIndex::Savi => &["B8", "B4"],
            SpectralIndex::Ndre => &["B8", "B5"],
            SpectralIndex::Mndwi => &["B3", "B11"],
            SpectralIndex::Bsi => &["B11", "B4", "B8", "B2"],
            SpectralIndex::Brightness => &["B2", "B3", "B4"],
        }
    }

    /// Index value for one pixel given its inputs.
    pub fn evaluate(&self, v: &[f64]) -> f64 {
        match self {
            SpectralIndex::Ndvi
            | SpectralIndex::Ndwi
            | SpectralIndex::Ndbi
            | SpectralIndex::Ndre
            | SpectralIndex::Mndwi => normalized_difference(v[0], v[1]),
            SpectralIndex::Evi => {
                let (nir, red, blue) = (v[0], v[1], v[2]);
                ratio(2.5 * (nir - red), nir + 6.0 * red - 7.5 * blue + 1.0)
            }
            SpectralIndex::Savi => {
                let (nir, red) = (v[0], v[1]);
                ratio(nir - red, nir + red + SAVI_L) * (1.0 + SAVI_L)
            }
            SpectralIndex::Bsi => {
                let (swir, red, nir, blue) = (v[0], v[1], v[2], v[3]);
                ratio((swir + red) - (nir + blue), (swir + red) + (nir + blue))
            }
            SpectralIndex::Brightness => v.iter().sum::<f64>() / v.len() as f64,
        }
    }
}

fn ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        f64::NAN
    } else {
        numerator / denominator
    }
}

pub fn normalized_difference(a: f64, b: f64) -> f64 {
    ratio(a - b, a + b)
}

/// Compute one index raster, or `None` if an input band is missing.
pub fn compute_index(composite: &Composite, index: SpectralIndex) -> Option<Array2<f32>> {
    let inputs: Vec<&Array2<f32>> = index
        .inputs()
        .iter()
        .map(|band| composite.band(band))
        .collect::<Option<Vec<_>>>()?;

    let (nrows, ncols) = inputs[0].dim();
    let mut output = Array2::<f32>::from_elem((nrows, ncols), f32::NAN);

    Zip::indexed(&mut output).par_for_each(|(row, col), out| {
        let values: Vec<f64> = inputs.iter().map(|band| f64::from(band[[row, col]])).collect();
        if values.iter().all(|v| v.is_finite()) {
            *out = index.evaluate(&values) as f32;
        }
    });

    Some(output)
}

/// Compute every index whose inputs are present in the composite.
pub fn compute_all(composite: &Composite) -> Vec<(String, Array2<f32>)> {
    let mut bands = Vec::new();
    for index in SpectralIndex::ALL {
        match compute_index(composite, index) {
            Some(data) => bands.push((index.name().to_string(), data)),
            None => warn!(
                "Skipping {}: needs bands {:?}",
                index.name(),
                index.inputs()
            ),
        }
    }
    info!("Computed {} spectral index band(s)", bands.len());
    bands
}
