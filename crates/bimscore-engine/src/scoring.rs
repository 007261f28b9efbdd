//! Period score computed at approval time.
//!
//! ```text
//!   indicator   = 100 if any in-scope item tagged with it is ACCEPTABLE, else 0
//!   perspective = Σ(w_i · indicator_i) / Σ w_i          (0 without indicators)
//!   final       = Σ(W_p · perspective_p) / Σ W_p        rounded to 2 decimals
//! ```

use bimscore_model::{
    EffectiveStatus, EvidenceView, IndicatorWeight, Perspective, PerspectiveScore, ScoringModel,
};
use std::collections::BTreeSet;

pub const FALLBACK_PERSPECTIVE_ID: &str = "overall";

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreCard {
    pub final_bim_score: f64,
    pub breakdown: Vec<PerspectiveScore>,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn weighted_mean<I>(pairs: I) -> f64
where
    I: IntoIterator<Item = (f64, f64)>,
{
    let (sum, weight) = pairs
        .into_iter()
        .filter(|(w, _)| w.is_finite() && *w > 0.0)
        .fold((0.0, 0.0), |(s, tw), (w, v)| (s + w * v, tw + w));
    if weight > 0.0 {
        sum / weight
    } else {
        0.0
    }
}

/// Single equal-weight perspective over every indicator the items mention.
fn fallback_model(views: &[EvidenceView]) -> ScoringModel {
    let indicators: BTreeSet<&str> = views
        .iter()
        .flat_map(|v| v.item.indicator_ids.iter().map(String::as_str))
        .collect();
    ScoringModel {
        perspectives: vec![Perspective {
            id: FALLBACK_PERSPECTIVE_ID.to_string(),
            name: "Overall".to_string(),
            weight: 1.0,
            indicators: indicators
                .into_iter()
                .map(|id| IndicatorWeight {
                    id: id.to_string(),
                    weight: 1.0,
                })
                .collect(),
        }],
    }
}

pub fn score_period(model: Option<&ScoringModel>, views: &[EvidenceView]) -> ScoreCard {
    let fallback;
    let model = match model.filter(|m| !m.perspectives.is_empty()) {
        Some(model) => model,
        None => {
            fallback = fallback_model(views);
            &fallback
        }
    };

    let accepted: BTreeSet<&str> = views
        .iter()
        .filter(|v| v.effective_status == EffectiveStatus::Acceptable)
        .flat_map(|v| v.item.indicator_ids.iter().map(String::as_str))
        .collect();

    let raw: Vec<f64> = model
        .perspectives
        .iter()
        .map(|p| {
            weighted_mean(p.indicators.iter().map(|i| {
                let value = if accepted.contains(i.id.as_str()) { 100.0 } else { 0.0 };
                (i.weight, value)
            }))
        })
        .collect();

    // Rounded once, from the unrounded perspective scores.
    let final_bim_score = round2(weighted_mean(
        model.perspectives.iter().zip(&raw).map(|(p, score)| (p.weight, *score)),
    ));

    let breakdown = model
        .perspectives
        .iter()
        .zip(raw)
        .map(|(p, score)| PerspectiveScore {
            perspective_id: p.id.clone(),
            name: p.name.clone(),
            score: round2(score),
        })
        .collect();

    ScoreCard {
        final_bim_score,
        breakdown,
    }
}
