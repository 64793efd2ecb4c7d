mod presets;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub use presets::Preset;

/// One window of the load shape.
///
/// `end_offset_seconds` is cumulative from run start, not a duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDef {
    pub label: String,
    pub end_offset_seconds: f64,
    pub target_concurrency: u64,
    pub ramp_rate: f64,
}

impl StageDef {
    pub fn new(
        label: impl Into<String>,
        end_offset_seconds: f64,
        target_concurrency: u64,
        ramp_rate: f64,
    ) -> Self {
        Self {
            label: label.into(),
            end_offset_seconds,
            target_concurrency,
            ramp_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeState {
    Stage(usize),
    Terminated,
}

impl ShapeState {
    pub fn stage_index(self) -> Option<usize> {
        match self {
            Self::Stage(idx) => Some(idx),
            Self::Terminated => None,
        }
    }
}

/// A stage definition problem found while building a [`StagePlan`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanIssue {
    NonMonotonicOffset {
        index: usize,
        label: String,
        end_offset_seconds: f64,
        previous_end_offset_seconds: f64,
    },
    NonFiniteOffset {
        index: usize,
        label: String,
    },
    DuplicateLabel {
        index: usize,
        label: String,
        first_index: usize,
    },
    NonPositiveRampRate {
        index: usize,
        label: String,
        ramp_rate: f64,
    },
}

impl PlanIssue {
    pub fn index(&self) -> usize {
        match self {
            Self::NonMonotonicOffset { index, .. }
            | Self::NonFiniteOffset { index, .. }
            | Self::DuplicateLabel { index, .. }
            | Self::NonPositiveRampRate { index, .. } => *index,
        }
    }
}

impl fmt::Display for PlanIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NonMonotonicOffset {
                label,
                end_offset_seconds,
                previous_end_offset_seconds,
                ..
            } => write!(
                f,
                "stage `{label}` ends at {end_offset_seconds}s, not after the previous stage ({previous_end_offset_seconds}s)"
            ),
            Self::NonFiniteOffset { label, .. } => {
                write!(f, "stage `{label}` has a non-finite end offset")
            }
            Self::DuplicateLabel {
                label, first_index, ..
            } => write!(
                f,
                "stage label `{label}` is already used by stage #{}",
                first_index + 1
            ),
            Self::NonPositiveRampRate {
                label, ramp_rate, ..
            } => write!(f, "stage `{label}` has non-positive ramp rate {ramp_rate}"),
        }
    }
}

/// Validated, immutable stage list plus the pure elapsed-time transition function.
#[derive(Debug, Clone)]
pub struct StagePlan {
    stages: Vec<StageDef>,
    issues: Vec<PlanIssue>,
    quarantined: Vec<bool>,
}

impl StagePlan {
    /// Builds a plan. Malformed stages are kept and quarantined, never rejected.
    pub fn new(stages: Vec<StageDef>) -> Result<Self> {
        if stages.is_empty() {
            return Err(Error::EmptyShape);
        }

        let mut issues = Vec::new();
        let mut first_by_label: HashMap<&str, usize> = HashMap::new();
        let mut prev_end: Option<f64> = None;

        for (index, stage) in stages.iter().enumerate() {
            let end = stage.end_offset_seconds;
            if !end.is_finite() {
                issues.push(PlanIssue::NonFiniteOffset {
                    index,
                    label: stage.label.clone(),
                });
            } else {
                if let Some(prev) = prev_end
                    && end <= prev
                {
                    issues.push(PlanIssue::NonMonotonicOffset {
                        index,
                        label: stage.label.clone(),
                        end_offset_seconds: end,
                        previous_end_offset_seconds: prev,
                    });
                }
                prev_end = Some(prev_end.map_or(end, |p| p.max(end)));
            }

            if let Some(&first_index) = first_by_label.get(stage.label.as_str()) {
                issues.push(PlanIssue::DuplicateLabel {
                    index,
                    label: stage.label.clone(),
                    first_index,
                });
            } else {
                first_by_label.insert(stage.label.as_str(), index);
            }

            if !(stage.ramp_rate.is_finite() && stage.ramp_rate > 0.0) {
                issues.push(PlanIssue::NonPositiveRampRate {
                    index,
                    label: stage.label.clone(),
                    ramp_rate: stage.ramp_rate,
                });
            }
        }

        let mut quarantined = vec![false; stages.len()];
        for issue in &issues {
            tracing::warn!(stage = issue.index() + 1, "{issue}");
            if let Some(q) = quarantined.get_mut(issue.index()) {
                *q = true;
            }
        }

        Ok(Self {
            stages,
            issues,
            quarantined,
        })
    }

    pub fn stages(&self) -> &[StageDef] {
        &self.stages
    }

    pub fn stage(&self, index: usize) -> Option<&StageDef> {
        self.stages.get(index)
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn issues(&self) -> &[PlanIssue] {
        &self.issues
    }

    pub fn is_quarantined(&self, index: usize) -> bool {
        self.quarantined.get(index).copied().unwrap_or(false)
    }

    /// Planned run length: the largest finite end offset.
    pub fn total_duration_seconds(&self) -> f64 {
        self.stages
            .iter()
            .map(|s| s.end_offset_seconds)
            .filter(|v| v.is_finite())
            .fold(0.0, f64::max)
    }

    pub fn max_concurrency(&self) -> u64 {
        self.stages
            .iter()
            .map(|s| s.target_concurrency)
            .max()
            .unwrap_or(0)
    }

    /// The first stage whose end offset lies after `elapsed`, or `Terminated`.
    pub fn state_at(&self, elapsed_seconds: f64) -> ShapeState {
        self.stages
            .iter()
            .position(|s| s.end_offset_seconds > elapsed_seconds)
            .map_or(ShapeState::Terminated, ShapeState::Stage)
    }

    /// `[start, end)` offsets of a stage, where start is the previous stage's end offset.
    pub fn window(&self, index: usize) -> Option<(f64, f64)> {
        let stage = self.stages.get(index)?;
        let start = if index == 0 {
            0.0
        } else {
            self.stages
                .get(index - 1)
                .map(|s| s.end_offset_seconds)
                .filter(|v| v.is_finite())
                .unwrap_or(0.0)
        };
        Some((start, stage.end_offset_seconds))
    }
}
