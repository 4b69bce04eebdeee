use crate::config::RunConfig;
use crate::error::{CompositeError, Result};
use crate::scene::SceneHeader;
use chrono::NaiveDate;
use geo::{Intersects, Rect};
use log::{debug, info};
use std::collections::HashMap;

/// Collection query on scene metadata: acquisition window and cloud ceiling.
#[derive(Debug, Clone)]
pub struct SceneFilter {
    /// Inclusive
    pub start: NaiveDate,
    /// Exclusive
    pub end: NaiveDate,
    /// Scenes must report strictly less than this percentage
    pub max_cloud: f64,
}

impl SceneFilter {
    pub fn from_config(config: &RunConfig) -> Self {
        Self {
            start: config.start_date,
            end: config.end_date,
            max_cloud: config.max_cloudy_pixel_percentage,
        }
    }

    pub fn in_date_range(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    pub fn below_cloud_limit(&self, cloudy_pct: f64) -> bool {
        cloudy_pct < self.max_cloud
    }

    pub fn accepts(&self, scene: &SceneHeader) -> bool {
        let keep = self.in_date_range(scene.date) && self.below_cloud_limit(scene.cloudy_pct);
        debug!(
            "{} {} (date={}, cloud={:.2}%)",
            if keep { "Keeping" } else { "Dropping" },
            scene.id,
            scene.date,
            scene.cloudy_pct
        );
        keep
    }

    /// Kept scenes, ordered by acquisition date then id.
    pub fn apply(&self, scenes: Vec<SceneHeader>) -> Result<Vec<SceneHeader>> {
        let candidates = scenes.len();
        let mut kept: Vec<SceneHeader> = scenes.into_iter().filter(|s| self.accepts(s)).collect();

        if kept.is_empty() {
            return Err(CompositeError::NoScenes(candidates));
        }

        kept.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.id.cmp(&b.id)));
        info!(
            "{} of {} scene(s) pass the filter ({} to {}, cloud < {}%)",
            kept.len(),
            candidates,
            self.start,
            self.end,
            self.max_cloud
        );
        Ok(kept)
    }
}

/// Scene footprint meets `envelope`; both are in the scene CRS.
pub fn overlaps(scene: &SceneHeader, envelope: &Rect<f64>) -> bool {
    scene.metadata.footprint().intersects(envelope)
}

/// Keep the scenes whose footprint meets the ROI.
///
/// `envelope_in` returns the ROI envelope expressed in a given projection; it
/// is called once per distinct scene CRS. Order is preserved.
pub fn retain_overlapping<F>(scenes: Vec<SceneHeader>, mut envelope_in: F) -> Result<Vec<SceneHeader>>
where
    F: FnMut(&str) -> Result<Rect<f64>>,
{
    let candidates = scenes.len();
    let mut envelopes: HashMap<String, Rect<f64>> = HashMap::new();
    let mut kept = Vec::with_capacity(candidates);

    for scene in scenes {
        let projection = &scene.metadata.projection;
        let envelope = match envelopes.get(projection) {
            Some(envelope) => *envelope,
            None => {
                let envelope = envelope_in(projection)?;
                envelopes.insert(projection.clone(), envelope);
                envelope
            }
        };

        if overlaps(&scene, &envelope) {
            kept.push(scene);
        } else {
            debug!("Dropping {}: footprint misses the ROI", scene.id);
        }
    }

    info!(
        "{} of {} scene(s) overlap the ROI ({} CRS)",
        kept.len(),
        candidates,
        envelopes.len()
    );
    if kept.is_empty() {
        return Err(CompositeError::NoScenes(candidates));
    }
    Ok(kept)
}

/// Order scenes from least to most cloudy; ties resolved by date.
pub fn sort_by_cloudiness(scenes: &mut [SceneHeader]) {
    scenes.sort_by(|a, b| {
        a.cloudy_pct
            .total_cmp(&b.cloudy_pct)
            .then_with(|| a.date.cmp(&b.date))
    });
}
