// Metrics Aggregator: turns per-stage Delta E summaries into an ordered,
// human-readable quality report.

use serde::Serialize;

use crate::core::types::{PipelineResult, StageKind, StageMetrics};

/// Qualitative bucket for a stage's mean Delta E.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Excellent,
    VeryGood,
    Good,
    Fair,
    NeedsImprovement,
}

impl Quality {
    /// Bucket thresholds follow the usual Delta E perceptibility bands.
    pub fn from_mean(mean: f64) -> Quality {
        if mean < 1.0 {
            Quality::Excellent
        } else if mean < 2.0 {
            Quality::VeryGood
        } else if mean < 3.5 {
            Quality::Good
        } else if mean < 5.0 {
            Quality::Fair
        } else {
            Quality::NeedsImprovement
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Quality::Excellent => "excellent",
            Quality::VeryGood => "very good",
            Quality::Good => "good",
            Quality::Fair => "fair",
            Quality::NeedsImprovement => "needs improvement",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: StageKind,
    pub metrics: StageMetrics,
    pub quality: Quality,
}

/// Stage reports in fixed pipeline order, restricted to the stages the run
/// actually produced metrics for.
pub fn aggregate(result: &PipelineResult) -> Vec<StageReport> {
    StageKind::ALL
        .iter()
        .filter_map(|stage| {
            result.stage_metrics.get(stage).map(|metrics| StageReport {
                stage: *stage,
                metrics: *metrics,
                quality: Quality::from_mean(metrics.mean),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn metrics(mean: f64) -> StageMetrics {
        StageMetrics {
            mean,
            min: mean / 2.0,
            max: mean * 2.0,
            std_dev: Some(0.4),
        }
    }

    #[test]
    fn buckets_follow_thresholds() {
        assert_eq!(Quality::from_mean(0.99), Quality::Excellent);
        assert_eq!(Quality::from_mean(1.0), Quality::VeryGood);
        assert_eq!(Quality::from_mean(2.0), Quality::Good);
        assert_eq!(Quality::from_mean(3.5), Quality::Fair);
        assert_eq!(Quality::from_mean(5.0), Quality::NeedsImprovement);
    }

    #[test]
    fn report_is_pipeline_ordered_and_filtered() {
        let mut stage_metrics = BTreeMap::new();
        // Inserted out of pipeline order on purpose.
        stage_metrics.insert(StageKind::Cc, metrics(0.8));
        stage_metrics.insert(StageKind::Ffc, metrics(4.2));
        stage_metrics.insert(StageKind::Wb, metrics(1.5));

        let result = PipelineResult {
            image_index: 0,
            stage_images: BTreeMap::new(),
            stage_metrics,
            scatter: None,
            diff: None,
            original: None,
        };

        let reports = aggregate(&result);
        let stages: Vec<StageKind> = reports.iter().map(|r| r.stage).collect();
        assert_eq!(stages, vec![StageKind::Ffc, StageKind::Wb, StageKind::Cc]);
        assert_eq!(reports[0].quality, Quality::Fair);
        assert_eq!(reports[2].quality, Quality::Excellent);
    }

    #[test]
    fn empty_metrics_yield_empty_report() {
        let result = PipelineResult {
            image_index: 0,
            stage_images: BTreeMap::new(),
            stage_metrics: BTreeMap::new(),
            scatter: None,
            diff: None,
            original: None,
        };
        assert!(aggregate(&result).is_empty());
    }
}
