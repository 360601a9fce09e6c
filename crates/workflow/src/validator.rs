//! Advisory structural validation of shaped results. Warnings never block.

use pke_core::course::{AssistanceTier, BloomLevel};
use pke_core::invocation::Invocation;
use serde::Serialize;
use serde_json::Value;

use crate::parser::ParseMode;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationWarning {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub warnings: Vec<ValidationWarning>,
}

#[derive(Default)]
struct Warnings(Vec<ValidationWarning>);

impl Warnings {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(ValidationWarning {
            field: field.into(),
            message: message.into(),
        });
    }

    fn finish(self) -> ValidationReport {
        ValidationReport {
            valid: self.0.is_empty(),
            warnings: self.0,
        }
    }
}

fn non_empty_str(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty())
}

fn array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map_or(&[], Vec::as_slice)
}

/// Validate a shaped result for `invocation`.
pub fn validate(invocation: Invocation, result: &Value, mode: ParseMode) -> ValidationReport {
    let mut w = Warnings::default();
    match mode {
        ParseMode::Structured => {}
        ParseMode::Heuristic => w.push(
            "response",
            "Output was not valid JSON; content was extracted heuristically",
        ),
        ParseMode::Raw => {
            w.push("response", "Output could not be parsed; review the raw content");
            return w.finish();
        }
    }

    match invocation {
        Invocation::Description => description(result, &mut w),
        Invocation::Objectives => objectives(result, &mut w),
        Invocation::Structure => structure(result, &mut w),
        Invocation::FullBuild => {
            structure(result, &mut w);
            assessments(result, &mut w);
        }
        Invocation::TemplateMapping => template(result, &mut w),
    }
    w.finish()
}

fn description(result: &Value, w: &mut Warnings) {
    if !non_empty_str(result.get("description")) {
        w.push("description", "Description is missing");
    }
    let tier = result.get("assistanceTier").and_then(Value::as_str);
    if tier.and_then(AssistanceTier::parse).is_none() {
        w.push("assistanceTier", "Assistance tier must be full, guided or minimal");
    }
}

fn objectives(result: &Value, w: &mut Warnings) {
    let los = array(result, "learningObjectives");
    if los.is_empty() {
        w.push("learningObjectives", "At least one learning objective is required");
        return;
    }
    for (i, lo) in los.iter().enumerate() {
        let field = format!("learningObjectives[{i}]");
        if !non_empty_str(lo.get("code")) {
            w.push(&field, "Objective code is missing");
        }
        if !non_empty_str(lo.get("text")) {
            w.push(&field, "Objective text is missing");
        }
        let bloom = lo.get("bloomLevel").and_then(Value::as_str);
        if bloom.and_then(BloomLevel::parse).is_none() {
            w.push(&field, "Bloom level is missing or invalid");
        }
    }
}

fn structure(result: &Value, w: &mut Warnings) {
    let topics = array(result, "topics");
    if topics.is_empty() {
        w.push("topics", "At least one topic is required");
        return;
    }
    for (i, topic) in topics.iter().enumerate() {
        let field = format!("topics[{i}]");
        if !non_empty_str(topic.get("title")) {
            w.push(&field, "Topic title is missing");
        }
        let lessons: usize = array(topic, "subtopics")
            .iter()
            .map(|s| array(s, "lessons").len())
            .sum();
        if lessons == 0 {
            w.push(&field, "Topic has no lessons");
        }
    }
}

fn assessments(result: &Value, w: &mut Warnings) {
    for (i, item) in array(result, "assessments").iter().enumerate() {
        let field = format!("assessments[{i}]");
        if !non_empty_str(item.get("question")) {
            w.push(&field, "Assessment question is missing");
        }
        let kind = item.get("type").and_then(Value::as_str);
        let options = array(item, "options");
        match kind {
            Some("MCQ") if options.len() < 2 => {
                w.push(&field, "Multiple-choice items need at least two options")
            }
            Some("MCQ" | "TrueFalse" | "ShortAnswer") => {}
            _ => w.push(&field, "Assessment type must be MCQ, TrueFalse or ShortAnswer"),
        }
        if item.get("correctAnswer").is_none_or(Value::is_null) {
            w.push(&field, "Correct answer is missing");
        }
    }
}

fn template(result: &Value, w: &mut Warnings) {
    if array(result, "detectedFields").is_empty() {
        w.push("detectedFields", "No template fields were detected");
    }
    if result.get("templateAnalysis").is_none_or(Value::is_null) {
        w.push("templateAnalysis", "Template analysis is missing");
    }
}
