use serde::{Deserialize, Serialize};

use crate::geometry::PostureMetrics;

/// Posture bounds. All comparisons are inclusive.
///
/// The defaults were tuned for a laptop webcam at roughly arm's length; other
/// camera placements usually need their own values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_min_head")]
    pub min_head: f64,
    #[serde(default = "default_max_head")]
    pub max_head: f64,
    #[serde(default = "default_shoulder_max")]
    pub shoulder_max: f64,
    #[serde(default = "default_spine_min")]
    pub spine_min: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            min_head: default_min_head(),
            max_head: default_max_head(),
            shoulder_max: default_shoulder_max(),
            spine_min: default_spine_min(),
        }
    }
}

fn default_min_head() -> f64 {
    90.0
}
fn default_max_head() -> f64 {
    110.0
}
fn default_shoulder_max() -> f64 {
    20.0
}
fn default_spine_min() -> f64 {
    171.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Classification {
    pub head_ok: bool,
    pub shoulder_ok: bool,
    pub spine_ok: bool,
}

impl Classification {
    pub fn all_ok(&self) -> bool {
        self.head_ok && self.shoulder_ok && self.spine_ok
    }
}

impl ThresholdConfig {
    pub fn head_ok(&self, head_tilt: f64) -> bool {
        (self.min_head..=self.max_head).contains(&head_tilt)
    }

    pub fn shoulder_ok(&self, shoulder_tilt: f64) -> bool {
        shoulder_tilt <= self.shoulder_max
    }

    pub fn spine_ok(&self, spine_angle: f64) -> bool {
        spine_angle >= self.spine_min
    }

    pub fn classify(&self, metrics: &PostureMetrics) -> Classification {
        Classification {
            head_ok: self.head_ok(metrics.head_tilt),
            shoulder_ok: self.shoulder_ok(metrics.shoulder_tilt),
            spine_ok: self.spine_ok(metrics.spine_angle),
        }
    }
}
