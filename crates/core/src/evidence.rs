//! Evidence grades: the trust classification attached to generated content.
//!
//! | Grade | Meaning | Weight |
//! |-------|---------|--------|
//! | A | Policy / template truth | 1.0 |
//! | B | Curated knowledge packs | 0.85 |
//! | C | Cited external sources | 0.7 |
//! | D | Heuristic draft | 0.5 |

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// A trust grade. Ordered so that `A > B > C > D`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EvidenceGrade {
    A,
    B,
    C,
    #[default]
    D,
}

/// Display details for a grade.
#[derive(Debug, Clone, Serialize)]
pub struct GradeDetails {
    pub code: EvidenceGrade,
    pub name: &'static str,
    pub description: &'static str,
    pub color: &'static str,
    pub weight: f64,
}

impl EvidenceGrade {
    pub const ALL: [EvidenceGrade; 4] = [
        EvidenceGrade::A,
        EvidenceGrade::B,
        EvidenceGrade::C,
        EvidenceGrade::D,
    ];

    /// Fixed weight used for aggregate scoring.
    pub fn weight(self) -> f64 {
        match self {
            EvidenceGrade::A => 1.0,
            EvidenceGrade::B => 0.85,
            EvidenceGrade::C => 0.7,
            EvidenceGrade::D => 0.5,
        }
    }

    fn rank(self) -> u8 {
        match self {
            EvidenceGrade::A => 3,
            EvidenceGrade::B => 2,
            EvidenceGrade::C => 1,
            EvidenceGrade::D => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EvidenceGrade::A => "A",
            EvidenceGrade::B => "B",
            EvidenceGrade::C => "C",
            EvidenceGrade::D => "D",
        }
    }

    pub fn details(self) -> GradeDetails {
        let (name, description, color) = match self {
            EvidenceGrade::A => (
                "Policy / Template Truth",
                "Content derived from organizational templates or policies",
                "green",
            ),
            EvidenceGrade::B => (
                "Curated Knowledge Packs",
                "Content from vetted, curated internal knowledge",
                "blue",
            ),
            EvidenceGrade::C => (
                "Cited External Sources",
                "Content with external citations and references",
                "yellow",
            ),
            EvidenceGrade::D => (
                "Heuristic Draft",
                "AI-generated content requiring review",
                "orange",
            ),
        };
        GradeDetails {
            code: self,
            name,
            description,
            color,
            weight: self.weight(),
        }
    }
}

impl PartialOrd for EvidenceGrade {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EvidenceGrade {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl std::fmt::Display for EvidenceGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EvidenceGrade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(EvidenceGrade::A),
            "B" => Ok(EvidenceGrade::B),
            "C" => Ok(EvidenceGrade::C),
            "D" => Ok(EvidenceGrade::D),
            other => Err(format!("unknown evidence grade: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grades_are_totally_ordered_a_highest() {
        assert!(EvidenceGrade::A > EvidenceGrade::B);
        assert!(EvidenceGrade::B > EvidenceGrade::C);
        assert!(EvidenceGrade::C > EvidenceGrade::D);
        assert_eq!(EvidenceGrade::ALL.iter().max(), Some(&EvidenceGrade::A));
    }

    #[test]
    fn weights_follow_order() {
        for pair in EvidenceGrade::ALL.windows(2) {
            assert!(pair[0].weight() > pair[1].weight());
        }
        assert!((EvidenceGrade::B.weight() - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn parse_is_case_insensitive() {
        assert_eq!("b".parse::<EvidenceGrade>(), Ok(EvidenceGrade::B));
        assert!("E".parse::<EvidenceGrade>().is_err());
    }

    #[test]
    fn default_is_heuristic_draft() {
        assert_eq!(EvidenceGrade::default(), EvidenceGrade::D);
        assert_eq!(EvidenceGrade::D.details().name, "Heuristic Draft");
    }

    #[test]
    fn serializes_as_letter() {
        assert_eq!(serde_json::to_string(&EvidenceGrade::A).unwrap(), "\"A\"");
    }
}
