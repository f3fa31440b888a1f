//! Scoring and verdict rendering.
//!
//! Deterministic: impact from symptom severity, confidence from evidence
//! quality and the top hypothesis, noise from family priors and
//! corroboration gaps. Classification follows from the three scores.

use tarka_core::family::Family;
use tarka_core::model::analysis::{Classification, Features, Hypothesis, NoiseAssessment, Scores, Verdict};
use tarka_core::Investigation;

/// Compute scores from features + hypotheses.
#[must_use]
pub fn compute_scores(features: &Features, hypotheses: &[Hypothesis]) -> Scores {
    let family = features.family.unwrap_or(Family::Generic);
    let mut reason_codes: Vec<String> = Vec::new();

    // --- impact
    let mut impact: i64 = match family {
        Family::Crashloop | Family::OomKilled | Family::JobFailed => 60,
        Family::Http5xx | Family::PodNotHealthy | Family::K8sRolloutHealth => 55,
        Family::MemoryPressure | Family::CpuThrottling => 40,
        Family::TargetDown | Family::ObservabilityPipeline => 35,
        Family::Meta => 5,
        Family::Generic => 30,
    };
    if features.k8s.restart_rate_5m_max.unwrap_or(0.0) >= 3.0 {
        impact += 15;
        reason_codes.push("high_restart_rate".to_string());
    }
    if features.k8s.oom_killed {
        impact += 15;
        reason_codes.push("oom_killed".to_string());
    }
    if features.metrics.http_5xx_rate_p95.unwrap_or(0.0) >= 1.0 {
        impact += 15;
        reason_codes.push("elevated_5xx_rate".to_string());
    }
    if features.logs.fatal_count > 0 {
        impact += 10;
        reason_codes.push("fatal_log_patterns".to_string());
    }

    // --- confidence
    let top_conf = i64::from(hypotheses.first().map_or(0, |h| h.confidence_0_100));
    let quality_bonus: i64 = match features.quality.evidence_quality.as_str() {
        "high" => 15,
        "medium" => 5,
        _ => -10,
    };
    let confidence = (top_conf + quality_bonus).clamp(0, 100);
    if features.quality.evidence_quality == "low" {
        reason_codes.push("low_evidence_quality".to_string());
    }

    // --- noise
    let mut noise: i64 = match family {
        Family::Meta => 90,
        Family::TargetDown | Family::ObservabilityPipeline => 55,
        Family::CpuThrottling => 45,
        _ => 20,
    };
    if !features.quality.contradiction_flags.is_empty() {
        noise += 20;
        reason_codes.push("contradictory_evidence".to_string());
    }
    // Throttling far from the CPU limit rarely needs action.
    if family == Family::CpuThrottling && features.metrics.cpu_near_limit == Some(false) {
        noise += 20;
        reason_codes.push("throttling_far_from_limit".to_string());
    }
    let noise = noise.clamp(0, 100);

    let classification = classify(impact.clamp(0, 100), confidence, noise);

    Scores {
        impact_score: impact.clamp(0, 100) as u8,
        confidence_score: confidence as u8,
        noise_score: noise as u8,
        classification,
        reason_codes,
    }
}

fn classify(impact: i64, confidence: i64, noise: i64) -> Classification {
    if noise >= 60 {
        return Classification::Noisy;
    }
    if impact >= 50 && confidence >= 50 {
        return Classification::Actionable;
    }
    Classification::Informational
}

/// Produce the verdict: one-liner, primary driver and next steps.
#[must_use]
pub fn render_verdict(inv: &Investigation, features: &Features, scores: &Scores) -> Verdict {
    let family = features.family.unwrap_or(Family::Generic);
    let target_name = inv.target.display_name().to_string();
    let top = inv.analysis.hypotheses.first();

    let primary_driver = top.map_or_else(|| family.as_str().to_string(), |h| h.hypothesis_id.clone());

    let one_liner = match top {
        Some(h) => format!("{target_name}: {} ({}%)", h.title, h.confidence_0_100),
        None => format!("{target_name}: {} alert with no hypothesis yet", family.as_str()),
    };

    let next: Vec<String> = top.map(|h| h.next_tests.clone()).unwrap_or_default();

    Verdict {
        severity: inv.alert.severity().map(ToString::to_string),
        classification: scores.classification,
        primary_driver,
        one_liner,
        family,
        next,
    }
}

/// Family-prior noise assessment attached alongside the scores.
#[must_use]
pub fn assess_noise(features: &Features, scores: &Scores) -> NoiseAssessment {
    let mut notes = Vec::new();
    if scores.classification == Classification::Noisy {
        notes.push("classified noisy: consider tuning the alert rule".to_string());
    }
    for flag in &features.quality.contradiction_flags {
        notes.push(format!("contradiction: {flag}"));
    }
    NoiseAssessment {
        score: Some(scores.noise_score),
        notes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarka_core::model::analysis::{K8sFeatures, LogFeatures, MetricFeatures, QualityFeatures};

    fn features(family: Family, quality: &str) -> Features {
        Features {
            family: Some(family),
            k8s: K8sFeatures::default(),
            metrics: MetricFeatures::default(),
            logs: LogFeatures::default(),
            quality: QualityFeatures {
                evidence_quality: quality.to_string(),
                missing_inputs: vec![],
                contradiction_flags: vec![],
            },
        }
    }

    fn hyp(conf: u8) -> Hypothesis {
        Hypothesis {
            hypothesis_id: "h".to_string(),
            title: "t".to_string(),
            confidence_0_100: conf,
            why: vec![],
            supporting_refs: vec![],
            next_tests: vec![],
        }
    }

    #[test]
    fn test_meta_is_noisy() {
        let s = compute_scores(&features(Family::Meta, "high"), &[hyp(90)]);
        assert_eq!(s.classification, Classification::Noisy);
        assert!(s.noise_score >= 60);
    }

    #[test]
    fn test_crashloop_actionable() {
        let mut f = features(Family::Crashloop, "high");
        f.k8s.restart_rate_5m_max = Some(5.0);
        let s = compute_scores(&f, &[hyp(80)]);
        assert_eq!(s.classification, Classification::Actionable);
        assert!(s.impact_score >= 60);
        assert!(s.reason_codes.contains(&"high_restart_rate".to_string()));
    }

    #[test]
    fn test_throttling_far_from_limit_noisy() {
        let mut f = features(Family::CpuThrottling, "medium");
        f.metrics.cpu_near_limit = Some(false);
        let s = compute_scores(&f, &[hyp(35)]);
        assert_eq!(s.classification, Classification::Noisy);
    }

    #[test]
    fn test_low_quality_drops_confidence() {
        let s_high = compute_scores(&features(Family::Crashloop, "high"), &[hyp(70)]);
        let s_low = compute_scores(&features(Family::Crashloop, "low"), &[hyp(70)]);
        assert!(s_low.confidence_score < s_high.confidence_score);
    }

    #[test]
    fn test_no_hypotheses_informational() {
        let s = compute_scores(&features(Family::Generic, "low"), &[]);
        assert_eq!(s.classification, Classification::Informational);
        assert_eq!(s.confidence_score, 0);
    }
}
