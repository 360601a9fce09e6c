//! The five fixed generation steps of the authoring pipeline.

use crate::course::Stage;
use serde::{Deserialize, Serialize};

/// One of the five invocations. Serialized as its number (1-5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Invocation {
    /// 1: course description + assistance tier
    Description,
    /// 2: learning objectives
    Objectives,
    /// 3: topics / subtopics / lessons / performance criteria
    Structure,
    /// 4: full course build (materials, assessments, activities)
    FullBuild,
    /// 5: template mapping (administrative, course-independent)
    TemplateMapping,
}

impl Invocation {
    pub const ALL: [Invocation; 5] = [
        Invocation::Description,
        Invocation::Objectives,
        Invocation::Structure,
        Invocation::FullBuild,
        Invocation::TemplateMapping,
    ];

    pub fn number(self) -> u8 {
        match self {
            Invocation::Description => 1,
            Invocation::Objectives => 2,
            Invocation::Structure => 3,
            Invocation::FullBuild => 4,
            Invocation::TemplateMapping => 5,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Invocation::Description => "description",
            Invocation::Objectives => "objectives",
            Invocation::Structure => "structure",
            Invocation::FullBuild => "full_build",
            Invocation::TemplateMapping => "template_mapping",
        }
    }

    /// Whether this invocation operates on a course (1-4) or not (5).
    pub fn is_course_scoped(self) -> bool {
        !matches!(self, Invocation::TemplateMapping)
    }

    /// The stage a course moves to when this invocation's output is accepted.
    pub fn stage_on_accept(self) -> Option<Stage> {
        match self {
            Invocation::Description | Invocation::Objectives => Some(Stage::Design),
            Invocation::Structure => Some(Stage::Build),
            Invocation::FullBuild => Some(Stage::Format),
            Invocation::TemplateMapping => None,
        }
    }

    /// The invocation that naturally follows this one, if any.
    pub fn next(self) -> Option<Invocation> {
        match self {
            Invocation::Description => Some(Invocation::Objectives),
            Invocation::Objectives => Some(Invocation::Structure),
            Invocation::Structure => Some(Invocation::FullBuild),
            Invocation::FullBuild | Invocation::TemplateMapping => None,
        }
    }
}

impl TryFrom<u8> for Invocation {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            1 => Ok(Invocation::Description),
            2 => Ok(Invocation::Objectives),
            3 => Ok(Invocation::Structure),
            4 => Ok(Invocation::FullBuild),
            5 => Ok(Invocation::TemplateMapping),
            other => Err(format!("invocation must be between 1 and 5, got {other}")),
        }
    }
}

impl From<Invocation> for u8 {
    fn from(inv: Invocation) -> Self {
        inv.number()
    }
}

impl std::fmt::Display for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.number())
    }
}
