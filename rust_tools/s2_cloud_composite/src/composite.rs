use crate::error::{CompositeError, Result};
use crate::io::RasterMetadata;
use crate::mask::MaskedImage;
use clap::ValueEnum;
use log::{debug, info};
use ndarray::{Array2, Zip};
use rayon::prelude::*;
use serde::Deserialize;
use std::fmt;

/// How a stack of masked images is collapsed into one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Reducer {
    /// Per-pixel mean of the unmasked values
    Mean,
    /// Per-pixel median of the unmasked values
    Median,
    /// The single least cloudy scene, masks kept
    LeastCloudy,
}

impl fmt::Display for Reducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Reducer::Mean => "mean",
            Reducer::Median => "median",
            Reducer::LeastCloudy => "least-cloudy",
        };
        f.write_str(name)
    }
}

/// Temporal composite: one float band per reflectance band, `NaN` = no data.
#[derive(Debug, Clone)]
pub struct Composite {
    pub bands: Vec<(String, Array2<f32>)>,
    pub grid: RasterMetadata,
    pub scene_ids: Vec<String>,
    pub reducer: Reducer,
}

impl Composite {
    pub fn band(&self, name: &str) -> Option<&Array2<f32>> {
        self.bands
            .iter()
            .find(|(band_name, _)| band_name == name)
            .map(|(_, data)| data)
    }
}

fn check_stack(images: &[MaskedImage]) -> Result<&MaskedImage> {
    let reference = images.first().ok_or(CompositeError::NoScenes(0))?;

    for image in &images[1..] {
        if !image.grid.same_grid(&reference.grid) {
            return Err(CompositeError::GridMismatch(image.id.clone()));
        }
        for (name, _) in &reference.bands {
            if image.band(name).is_none() {
                return Err(CompositeError::MissingBand {
                    band: name.clone(),
                    source_name: image.id.clone(),
                });
            }
        }
    }

    Ok(reference)
}

fn mean(values: &mut Vec<f32>) -> f32 {
    if values.is_empty() {
        return f32::NAN;
    }
    let sum: f64 = values.iter().map(|&v| f64::from(v)).sum();
    (sum / values.len() as f64) as f32
}

fn median(values: &mut Vec<f32>) -> f32 {
    if values.is_empty() {
        return f32::NAN;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        values[mid]
    } else {
        ((f64::from(values[mid - 1]) + f64::from(values[mid])) / 2.0) as f32
    }
}

/// Reduce co-registered layers pixel by pixel, skipping `NaN`s
fn reduce_band(stack: &[&Array2<f32>], reduce: fn(&mut Vec<f32>) -> f32) -> Result<Array2<f32>> {
    let (nrows, ncols) = stack[0].dim();

    let rows: Vec<Vec<f32>> = (0..nrows)
        .into_par_iter()
        .map(|row| {
            let mut values = Vec::with_capacity(stack.len());
            (0..ncols)
                .map(|col| {
                    values.clear();
                    values.extend(
                        stack
                            .iter()
                            .map(|layer| layer[[row, col]])
                            .filter(|v| !v.is_nan()),
                    );
                    reduce(&mut values)
                })
                .collect()
        })
        .collect();

    let flat_data: Vec<f32> = rows.into_iter().flatten().collect();
    Ok(Array2::from_shape_vec((nrows, ncols), flat_data)?)
}

/// Collapse masked images into a temporal composite.
pub fn composite(images: &[MaskedImage], reducer: Reducer) -> Result<Composite> {
    let reference = check_stack(images)?;
    info!("Compositing {} image(s) with {} reducer", images.len(), reducer);

    let (bands, scene_ids) = match reducer {
        Reducer::LeastCloudy => {
            let best = images
                .iter()
                .min_by(|a, b| {
                    a.cloudy_pct
                        .total_cmp(&b.cloudy_pct)
                        .then_with(|| a.date.cmp(&b.date))
                })
                .unwrap_or(reference);
            info!("Least cloudy scene: {} ({:.2}%)", best.id, best.cloudy_pct);
            (best.bands.clone(), vec![best.id.clone()])
        }
        Reducer::Mean | Reducer::Median => {
            let reduce: fn(&mut Vec<f32>) -> f32 = if reducer == Reducer::Mean { mean } else { median };
            let bands = reference
                .bands
                .iter()
                .map(|(name, _)| {
                    debug!("Reducing band {}", name);
                    let stack: Vec<&Array2<f32>> =
                        images.iter().filter_map(|image| image.band(name)).collect();
                    Ok((name.clone(), reduce_band(&stack, reduce)?))
                })
                .collect::<Result<Vec<_>>>()?;
            (bands, images.iter().map(|image| image.id.clone()).collect())
        }
    };

    Ok(Composite {
        bands,
        grid: reference.grid.clone(),
        scene_ids,
        reducer,
    })
}

/// Blank out every pixel outside the ROI mask.
pub fn clip(composite: &mut Composite, roi_mask: &Array2<bool>) -> Result<()> {
    for (name, band) in composite.bands.iter_mut() {
        if band.dim() != roi_mask.dim() {
            return Err(CompositeError::GridMismatch(format!("ROI mask for band {}", name)));
        }
        Zip::from(band).and(roi_mask).for_each(|value, &inside| {
            if !inside {
                *value = f32::NAN;
            }
        });
    }
    Ok(())
}

/// Share of ROI pixels that hold data in every band.
pub fn valid_fraction(composite: &Composite, roi_mask: &Array2<bool>) -> f64 {
    let inside = roi_mask.iter().filter(|inside| **inside).count();
    if inside == 0 {
        return 0.0;
    }

    let valid = roi_mask
        .indexed_iter()
        .filter(|(index, inside)| {
            **inside
                && composite
                    .bands
                    .iter()
                    .all(|(_, band)| band.get(*index).map_or(false, |v| !v.is_nan()))
        })
        .count();

    valid as f64 / inside as f64
}
