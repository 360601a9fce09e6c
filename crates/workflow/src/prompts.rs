//! Prompt templates for each invocation.

use pke_core::invocation::Invocation;

use crate::context::ContextBundle;

const SYSTEM_BASE: &str = "You are PKE (Promethean Knowledge Engine), an expert instructional design assistant.
You create high-quality educational course content following best practices.
Always respond with valid JSON that can be parsed.";

const REVISION_SUFFIX: &str = "This is a REVISION request. The user has provided feedback on previous output.
Carefully address their specific concerns while maintaining overall quality.";

fn system_focus(invocation: Invocation) -> &'static str {
    match invocation {
        Invocation::Description => {
            "For Invocation 1, generate a comprehensive course description and determine the appropriate assistance tier.
Focus on clarity, learning outcomes, and target audience alignment."
        }
        Invocation::Objectives => {
            "For Invocation 2, generate learning objectives using Bloom's Taxonomy.
Each objective should be measurable, specific, and aligned with the course description.
Use action verbs appropriate to the cognitive level."
        }
        Invocation::Structure => {
            "For Invocation 3, create a detailed course structure with topics, subtopics, and lessons.
Ensure logical progression and appropriate depth for the course duration.
Include performance criteria where applicable."
        }
        Invocation::FullBuild => {
            "For Invocation 4, generate complete course materials including detailed lesson content.
Include activities, examples, and assessment items.
Maintain consistency with learning objectives and course structure."
        }
        Invocation::TemplateMapping => {
            "For Invocation 5, analyze document templates and create mapping profiles.
Identify placeholders, required fields, and automation opportunities."
        }
    }
}

/// System prompt for an invocation, with revision framing when requested.
pub fn system_prompt(invocation: Invocation, is_revision: bool) -> String {
    let mut prompt = format!("{SYSTEM_BASE}\n{}", system_focus(invocation));
    if is_revision {
        prompt.push_str("\n\n");
        prompt.push_str(REVISION_SUFFIX);
    }
    prompt
}

/// The task prompt with its output schema.
pub fn task_prompt(invocation: Invocation) -> &'static str {
    match invocation {
        Invocation::Description => {
            r#"Generate a comprehensive course description based on the provided context.

Requirements:
1. Write 2-4 paragraphs describing the course
2. Include target outcomes and audience fit
3. Determine appropriate assistance tier (full/guided/minimal)
4. Provide 3-5 suggestions for improvement

Output JSON format:
{
  "description": "course description text",
  "assistanceTier": "full|guided|minimal",
  "suggestions": ["suggestion 1", "suggestion 2"],
  "sources": []
}"#
        }
        Invocation::Objectives => {
            r#"Generate learning objectives for the course based on the provided context.

Requirements:
1. Create measurable learning objectives using Bloom's Taxonomy
2. Each objective should start with an action verb
3. Align objectives with the course description
4. Include the Bloom's level for each objective

Output JSON format:
{
  "learningObjectives": [
    {
      "code": "LO1",
      "text": "objective text starting with action verb",
      "bloomLevel": "remember|understand|apply|analyze|evaluate|create"
    }
  ],
  "alignmentNotes": "notes on how objectives align with course goals",
  "sources": []
}"#
        }
        Invocation::Structure => {
            r#"Create a detailed course structure with topics, subtopics, and lessons.

Requirements:
1. Organize content into logical topics
2. Each topic should have subtopics
3. Each subtopic should have specific lessons
4. Include duration estimates for lessons (minutes)
5. Add performance criteria where applicable

Output JSON format:
{
  "topics": [
    {
      "title": "Topic Title",
      "order": 1,
      "subtopics": [
        {
          "title": "Subtopic Title",
          "lessons": [
            {
              "title": "Lesson Title",
              "duration": 30,
              "performanceCriteria": ["criterion 1", "criterion 2"]
            }
          ]
        }
      ]
    }
  ],
  "estimatedDuration": { "total": 480, "unit": "minutes" },
  "sources": []
}"#
        }
        Invocation::FullBuild => {
            r#"Generate complete course materials including content, activities, and assessments.

Requirements:
1. Expand each lesson with detailed content
2. Create engaging activities
3. Develop assessment items linked to learning objectives
4. Maintain consistency with course structure

Output JSON format:
{
  "topics": [full topics with lesson content],
  "assessments": [
    {
      "question": "question text",
      "type": "MCQ|TrueFalse|ShortAnswer",
      "options": ["A", "B", "C", "D"],
      "correctAnswer": "A",
      "linkedLO": "LO1"
    }
  ],
  "activities": [
    { "title": "activity title", "type": "discussion|exercise|project", "description": "...", "duration": 20 }
  ],
  "summary": { "totalLessons": 0, "totalAssessments": 0, "totalActivities": 0 },
  "sources": []
}"#
        }
        Invocation::TemplateMapping => {
            r#"Analyze the provided document template and create a mapping profile.

Requirements:
1. Identify all placeholders and fields
2. Map fields to course data attributes
3. Suggest automation rules
4. Note any manual input requirements

Output JSON format:
{
  "analysis": "description of template structure",
  "fields": [
    { "name": "field name", "type": "text|list|table|image", "location": "where it appears", "required": true }
  ],
  "mappings": [
    { "field": "field name", "source": "course.attribute.path", "transform": "none|format|calculate" }
  ],
  "automationProfile": { "automatable": 80, "manualFields": ["field1"] }
}"#
        }
    }
}

/// The user message: task prompt followed by the serialized context bundle.
pub fn user_prompt(invocation: Invocation, context: &ContextBundle) -> String {
    format!(
        "{}\n\nContext:\n{}",
        task_prompt(invocation),
        context.to_pretty_json()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_names_the_invocation() {
        for inv in Invocation::ALL {
            let prompt = system_prompt(inv, false);
            assert!(prompt.starts_with("You are PKE"));
            assert!(prompt.contains(&format!("For Invocation {}", inv.number())));
            assert!(!prompt.contains("REVISION"));
        }
    }

    #[test]
    fn revision_adds_framing() {
        let prompt = system_prompt(Invocation::Objectives, true);
        assert!(prompt.ends_with("maintaining overall quality."));
        assert!(prompt.contains("This is a REVISION request"));
    }

    #[test]
    fn user_prompt_embeds_context() {
        let ctx = crate::context::template_context("Dear {{name}}", &[]);
        let prompt = user_prompt(Invocation::TemplateMapping, &ctx);
        assert!(prompt.contains("Output JSON format"));
        assert!(prompt.contains("\n\nContext:\n{"));
        assert!(prompt.contains("Dear {{name}}"));
    }
}
