//! Evidence grading: provenance signals to a trust grade, and course-level
//! aggregation for reporting.

use chrono::{DateTime, Utc};
use pke_core::course::Course;
use pke_core::evidence::{EvidenceGrade, GradeDetails};
use pke_core::invocation::Invocation;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// What is known about where generated content came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GradingSignals {
    pub invocation: Option<Invocation>,
    pub has_template_match: bool,
    pub has_curated_content: bool,
    pub has_citations: bool,
    pub sources: usize,
}

impl GradingSignals {
    pub fn for_invocation(invocation: Invocation) -> Self {
        Self {
            invocation: Some(invocation),
            ..Default::default()
        }
    }

    /// Pick up `sources` / `citations` arrays from a parsed result.
    pub fn with_output(mut self, output: &Value) -> Self {
        self.sources = output
            .get("sources")
            .and_then(Value::as_array)
            .map_or(0, Vec::len);
        self.has_citations = output
            .get("citations")
            .and_then(Value::as_array)
            .is_some_and(|c| !c.is_empty())
            || output.get("hasCitations").and_then(Value::as_bool) == Some(true);
        self
    }
}

/// First match wins: template mapping, template match, curated content,
/// citations or sources, otherwise a heuristic draft.
pub fn grade(signals: &GradingSignals) -> EvidenceGrade {
    if signals.invocation == Some(Invocation::TemplateMapping) {
        return EvidenceGrade::A;
    }
    if signals.has_template_match {
        return EvidenceGrade::A;
    }
    if signals.has_curated_content {
        return EvidenceGrade::B;
    }
    if signals.has_citations || signals.sources > 0 {
        return EvidenceGrade::C;
    }
    EvidenceGrade::D
}

/// Course-level aggregate of per-invocation grades.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OverallScore {
    /// Weighted mean, rounded to two decimals.
    pub score: f64,
    /// Count per grade letter. Empty when there were no grades.
    pub breakdown: BTreeMap<String, usize>,
    pub overall_grade: EvidenceGrade,
    pub total: usize,
}

pub fn calculate_overall_score(grades: &[EvidenceGrade]) -> OverallScore {
    if grades.is_empty() {
        return OverallScore {
            score: 0.0,
            breakdown: BTreeMap::new(),
            overall_grade: EvidenceGrade::D,
            total: 0,
        };
    }

    let mut breakdown: BTreeMap<String, usize> = EvidenceGrade::ALL
        .iter()
        .map(|g| (g.as_str().to_string(), 0))
        .collect();
    for g in grades {
        *breakdown.entry(g.as_str().to_string()).or_default() += 1;
    }

    let mean = grades.iter().map(|g| g.weight()).sum::<f64>() / grades.len() as f64;
    let overall_grade = if mean >= 0.90 {
        EvidenceGrade::A
    } else if mean >= 0.75 {
        EvidenceGrade::B
    } else if mean >= 0.60 {
        EvidenceGrade::C
    } else {
        EvidenceGrade::D
    };

    OverallScore {
        score: (mean * 100.0).round() / 100.0,
        breakdown,
        overall_grade,
        total: grades.len(),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationEvidence {
    pub number: Invocation,
    pub grade: EvidenceGrade,
    pub details: GradeDetails,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceReport {
    pub course_id: String,
    pub course_title: String,
    pub invocations: Vec<InvocationEvidence>,
    pub overall: OverallScore,
    pub generated_at: DateTime<Utc>,
}

/// Evidence report over every completed invocation of a course.
pub fn evidence_report(course: &Course) -> EvidenceReport {
    let invocations: Vec<InvocationEvidence> = course
        .completed_invocations
        .iter()
        .map(|c| InvocationEvidence {
            number: c.invocation,
            grade: c.evidence_grade,
            details: c.evidence_grade.details(),
            completed_at: c.completed_at,
        })
        .collect();
    let grades: Vec<EvidenceGrade> = invocations.iter().map(|i| i.grade).collect();

    EvidenceReport {
        course_id: course.id.clone(),
        course_title: course.title.clone(),
        invocations,
        overall: calculate_overall_score(&grades),
        generated_at: Utc::now(),
    }
}
