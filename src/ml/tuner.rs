// ============================================================
// Layer 5 — Accuracy-Aware Tuning (basic strategy)
// ============================================================
// Searches for the most aggressive quantization whose metric stays
// within the accuracy criterion of the FP32 baseline. A trial is a
// set of layers kept in FP32 ("fallback"); everything else is INT8.
//
//   phase 1  quantize everything
//   phase 2  fall back one layer at a time, remember each metric
//   phase 3  fall back layers cumulatively, the layer whose
//            single fallback scored best goes first
//
// The first trial that meets the criterion is accepted. The search
// stops early at `max_trials` or when the timeout elapses. The
// tuner knows nothing about models; the caller's closure converts
// and evaluates each candidate.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::domain::error::CompressionError;
use crate::domain::quantization::{AccuracyCriterion, TuningCriterion};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialRecord {
    pub index: usize,
    pub fallback: Vec<String>,
    pub metric: f64,
    pub accepted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuningReport {
    pub baseline: f64,
    pub trials: Vec<TrialRecord>,
    /// Index into `trials` of the accepted configuration
    pub accepted: usize,
}

impl TuningReport {
    pub fn accepted_trial(&self) -> &TrialRecord {
        &self.trials[self.accepted]
    }

    pub fn accepted_fallback(&self) -> BTreeSet<String> {
        self.accepted_trial().fallback.iter().cloned().collect()
    }
}

struct Search<'a, F> {
    baseline:  f64,
    criterion: &'a AccuracyCriterion,
    budget:    &'a TuningCriterion,
    started:   Instant,
    evaluate:  F,
    trials:    Vec<TrialRecord>,
}

impl<F> Search<'_, F>
where
    F: FnMut(&BTreeSet<String>) -> Result<f64>,
{
    fn exhausted(&self) -> bool {
        if self.trials.len() >= self.budget.max_trials {
            return true;
        }
        self.budget.timeout_secs > 0
            && self.started.elapsed() >= Duration::from_secs(self.budget.timeout_secs)
    }

    /// Run one trial. Returns its metric and whether it was accepted.
    fn trial(&mut self, fallback: &BTreeSet<String>) -> Result<(f64, bool)> {
        let metric   = (self.evaluate)(fallback)?;
        let accepted = self.criterion.meets(self.baseline, metric);
        let index    = self.trials.len() + 1;

        tracing::info!(
            "Trial {}: fallback={:?} metric={:.4} baseline={:.4} {}",
            index,
            fallback,
            metric,
            self.baseline,
            if accepted { "accepted" } else { "rejected" },
        );

        self.trials.push(TrialRecord {
            index,
            fallback: fallback.iter().cloned().collect(),
            metric,
            accepted,
        });
        Ok((metric, accepted))
    }

    fn accept(self) -> TuningReport {
        let accepted = self.trials.len() - 1;
        TuningReport { baseline: self.baseline, trials: self.trials, accepted }
    }

    fn give_up(self) -> anyhow::Error {
        let best = self
            .trials
            .iter()
            .map(|t| t.metric)
            .reduce(|a, b| if self.criterion.is_better(b, a) { b } else { a })
            .unwrap_or(f64::NAN);
        CompressionError::ToleranceNotMet {
            baseline: self.baseline,
            best,
            trials: self.trials.len(),
        }
        .into()
    }
}

/// Run the basic tuning strategy over `layers`.
///
/// `evaluate` receives the fallback set of a candidate and returns its metric.
/// Fails with `CompressionError::ToleranceNotMet` when no trial passes.
pub fn tune<F>(
    baseline:  f64,
    layers:    &[String],
    criterion: &AccuracyCriterion,
    budget:    &TuningCriterion,
    evaluate:  F,
) -> Result<TuningReport>
where
    F: FnMut(&BTreeSet<String>) -> Result<f64>,
{
    let mut search = Search {
        baseline,
        criterion,
        budget,
        started: Instant::now(),
        evaluate,
        trials: Vec::new(),
    };

    // ── Phase 1: everything INT8 ──────────────────────────────────────────────
    if search.trial(&BTreeSet::new())?.1 {
        return Ok(search.accept());
    }

    // ── Phase 2: single-layer fallback ────────────────────────────────────────
    let mut scored: Vec<(String, f64)> = Vec::with_capacity(layers.len());
    for layer in layers {
        if search.exhausted() {
            return Err(search.give_up());
        }
        let fallback = BTreeSet::from([layer.clone()]);
        let (metric, accepted) = search.trial(&fallback)?;
        if accepted {
            return Ok(search.accept());
        }
        scored.push((layer.clone(), metric));
    }

    // ── Phase 3: cumulative fallback, most helpful layer first ────────────────
    // Stable sort keeps forward order among equal scores.
    scored.sort_by(|a, b| {
        if criterion.is_better(a.1, b.1) {
            std::cmp::Ordering::Less
        } else if criterion.is_better(b.1, a.1) {
            std::cmp::Ordering::Greater
        } else {
            std::cmp::Ordering::Equal
        }
    });

    let mut fallback = BTreeSet::new();
    for (i, (layer, _)) in scored.into_iter().enumerate() {
        fallback.insert(layer);
        // a single-layer set was already tried in phase 2
        if i == 0 {
            continue;
        }
        if search.exhausted() {
            return Err(search.give_up());
        }
        if search.trial(&fallback)?.1 {
            return Ok(search.accept());
        }
    }

    Err(search.give_up())
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn layers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    /// Metric model: each quantized layer costs a fixed amount of accuracy.
    fn cost_model(costs: &[(&str, f64)]) -> impl FnMut(&BTreeSet<String>) -> Result<f64> {
        let costs: BTreeMap<String, f64> =
            costs.iter().map(|(n, c)| (n.to_string(), *c)).collect();
        move |fallback| {
            Ok(costs
                .iter()
                .filter(|(name, _)| !fallback.contains(*name))
                .fold(0.90, |acc, (_, c)| acc - c))
        }
    }

    #[test]
    fn test_first_trial_accepted_when_quantization_is_harmless() {
        let report = tune(
            0.90,
            &layers(&["a", "b"]),
            &AccuracyCriterion::absolute(0.01),
            &TuningCriterion::default(),
            cost_model(&[("a", 0.001), ("b", 0.001)]),
        )
        .unwrap();
        assert_eq!(report.trials.len(), 1);
        assert!(report.accepted_fallback().is_empty());
    }

    #[test]
    fn test_single_layer_fallback_wins() {
        let report = tune(
            0.90,
            &layers(&["a", "b", "c"]),
            &AccuracyCriterion::absolute(0.01),
            &TuningCriterion::default(),
            cost_model(&[("a", 0.001), ("b", 0.05), ("c", 0.001)]),
        )
        .unwrap();
        // trial 1 all-int8, trial 2 falls back "a", trial 3 falls back "b"
        assert_eq!(report.trials.len(), 3);
        assert_eq!(report.accepted_trial().fallback, vec!["b".to_string()]);
        assert!(report.accepted_trial().accepted);
    }

    #[test]
    fn test_cumulative_fallback_orders_by_single_layer_metric() {
        let mut seen = Vec::new();
        let mut model = cost_model(&[("a", 0.01), ("b", 0.03), ("c", 0.02)]);
        let report = tune(
            0.90,
            &layers(&["a", "b", "c"]),
            &AccuracyCriterion::absolute(0.015),
            &TuningCriterion::default(),
            |fb: &BTreeSet<String>| {
                seen.push(fb.clone());
                model(fb)
            },
        )
        .unwrap();
        // phase 2 metrics: a→0.85, b→0.87, c→0.86; so b, then b+c
        assert_eq!(report.accepted_fallback(), BTreeSet::from(["b".to_string(), "c".to_string()]));
        assert_eq!(seen.len(), 5);
        assert_eq!(report.trials[4].index, 5);
    }

    #[test]
    fn test_tolerance_not_met_reports_best() {
        let err = tune(
            0.90,
            &layers(&["a", "b"]),
            &AccuracyCriterion::absolute(0.0),
            &TuningCriterion::default(),
            |_: &BTreeSet<String>| Ok(0.5),
        )
        .unwrap_err();
        match err.downcast_ref::<CompressionError>() {
            Some(CompressionError::ToleranceNotMet { baseline, best, trials }) => {
                assert_eq!(*baseline, 0.90);
                assert_eq!(*best, 0.5);
                // all-int8, two singles, one cumulative pair
                assert_eq!(*trials, 4);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_max_trials_is_honoured() {
        let mut calls = 0;
        let budget = TuningCriterion { max_trials: 2, ..TuningCriterion::default() };
        let result = tune(
            0.90,
            &layers(&["a", "b", "c", "d"]),
            &AccuracyCriterion::absolute(0.0),
            &budget,
            |_: &BTreeSet<String>| {
                calls += 1;
                Ok(0.1)
            },
        );
        assert!(result.is_err());
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_evaluation_errors_propagate() {
        let result = tune(
            0.90,
            &layers(&["a"]),
            &AccuracyCriterion::default(),
            &TuningCriterion::default(),
            |_: &BTreeSet<String>| anyhow::bail!("evaluation failed"),
        );
        assert!(result.unwrap_err().to_string().contains("evaluation failed"));
    }
}
