//! Trigger rules (§4.J). Each rule is independent and stateless; the
//! evaluator owns concurrency and persistence so adding a rule never
//! touches that code, only this list.

use crate::types::IndicatorValue;

pub struct AlertDraft {
    pub alert_type: String,
    pub trigger_value: f64,
    pub trigger_label: String,
    pub details: serde_json::Value,
}

pub trait TriggerRule: Send + Sync {
    fn name(&self) -> &str;

    /// `previous` is the last indicator value seen for this
    /// (exchange,symbol,timeframe,type), if any was retained.
    fn evaluate(&self, previous: Option<&IndicatorValue>, current: &IndicatorValue) -> Option<AlertDraft>;
}

/// Fires once when `raw_value` crosses a fixed threshold, with
/// hysteresis so repeated small oscillations around the line don't
/// re-fire — the re-arm point is strictly inside the crossed side.
pub struct ThresholdCrossingRule {
    pub threshold: f64,
    pub hysteresis: f64,
}

impl TriggerRule for ThresholdCrossingRule {
    fn name(&self) -> &str {
        "threshold_crossing"
    }

    fn evaluate(&self, previous: Option<&IndicatorValue>, current: &IndicatorValue) -> Option<AlertDraft> {
        let prev_value = previous?.value.get("raw_value").copied()?;
        let cur_value = current.value.get("raw_value").copied()?;

        let was_below = prev_value < self.threshold - self.hysteresis;
        let now_above = cur_value >= self.threshold;
        let was_above = prev_value > self.threshold + self.hysteresis;
        let now_below = cur_value <= self.threshold;

        if was_below && now_above {
            Some(AlertDraft {
                alert_type: "threshold_crossing".to_string(),
                trigger_value: cur_value,
                trigger_label: "level_1".to_string(),
                details: serde_json::json!({ "direction": "up", "threshold": self.threshold }),
            })
        } else if was_above && now_below {
            Some(AlertDraft {
                alert_type: "threshold_crossing".to_string(),
                trigger_value: cur_value,
                trigger_label: "level_-1".to_string(),
                details: serde_json::json!({ "direction": "down", "threshold": self.threshold }),
            })
        } else {
            None
        }
    }
}

/// Fires on any `params.stage` transition (e.g. `rising` -> `falling`).
pub struct StageTransitionRule;

impl TriggerRule for StageTransitionRule {
    fn name(&self) -> &str {
        "stage_transition"
    }

    fn evaluate(&self, previous: Option<&IndicatorValue>, current: &IndicatorValue) -> Option<AlertDraft> {
        let previous = previous?;
        if previous.params.stage == current.params.stage {
            return None;
        }
        let label = match current.params.stage.as_str() {
            "rising" => "reversal_oversold",
            "falling" => "reversal_overbought",
            _ => return None,
        };
        Some(AlertDraft {
            alert_type: "stage_transition".to_string(),
            trigger_value: current.value.get("raw_value").copied().unwrap_or(0.0),
            trigger_label: label.to_string(),
            details: serde_json::json!({
                "from_stage": previous.params.stage,
                "to_stage": current.params.stage,
            }),
        })
    }
}

/// The default rule set wired into every evaluator unless overridden.
pub fn default_rules() -> Vec<Box<dyn TriggerRule>> {
    vec![
        Box::new(ThresholdCrossingRule { threshold: 0.0, hysteresis: 0.1 }),
        Box::new(StageTransitionRule),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use crate::types::IndicatorParams;

    fn value(raw: f64, stage: &str) -> IndicatorValue {
        let mut v = HashMap::new();
        v.insert("raw_value".to_string(), raw);
        IndicatorValue {
            timestamp_ms: 0,
            indicator_type: "momentum_stage".to_string(),
            value: v,
            params: IndicatorParams { stage: stage.to_string(), seeded: true, n_eff: 60, extra: HashMap::new() },
        }
    }

    #[test]
    fn threshold_rule_requires_hysteresis_gap_to_rearm() {
        let rule = ThresholdCrossingRule { threshold: 0.0, hysteresis: 0.1 };
        let prev = value(-0.2, "falling");
        let cur = value(0.05, "rising");
        assert!(rule.evaluate(Some(&prev), &cur).is_some());

        // Oscillating just inside the hysteresis band must not re-fire.
        let prev2 = value(0.05, "rising");
        let cur2 = value(0.02, "rising");
        assert!(rule.evaluate(Some(&prev2), &cur2).is_none());
    }

    #[test]
    fn stage_transition_fires_only_on_change() {
        let rule = StageTransitionRule;
        let prev = value(1.0, "rising");
        let same = value(1.2, "rising");
        assert!(rule.evaluate(Some(&prev), &same).is_none());

        let changed = value(-1.0, "falling");
        assert!(rule.evaluate(Some(&prev), &changed).is_some());
    }
}
