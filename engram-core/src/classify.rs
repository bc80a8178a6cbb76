//! Dump classifier
//!
//! Scores free text against four categories with a fixed keyword rubric.
//! An explicit hint breaks ties; text matching nothing falls through to
//! `finding`, which lands in the knowledge store rather than any
//! statistics-bearing table.

use std::collections::BTreeMap;

use serde::Serialize;

/// Category a dumped blob of text is filed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpKind {
    Decision,
    Task,
    Convention,
    Finding,
}

impl DumpKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DumpKind::Decision => "decision",
            DumpKind::Task => "task",
            DumpKind::Convention => "convention",
            DumpKind::Finding => "finding",
        }
    }
}

impl std::str::FromStr for DumpKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "decision" => Ok(DumpKind::Decision),
            "task" => Ok(DumpKind::Task),
            "convention" => Ok(DumpKind::Convention),
            "finding" => Ok(DumpKind::Finding),
            _ => Err(format!("unknown dump kind: {}", s)),
        }
    }
}

/// Confidence of a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpConfidence {
    Low,
    Medium,
    High,
}

/// Classification verdict with per-category scores.
#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    #[serde(rename = "type")]
    pub kind: DumpKind,
    pub confidence: DumpConfidence,
    pub scores: BTreeMap<&'static str, u32>,
}

const DECISION_CUES: &[&str] = &[
    "decided",
    "decision",
    "we chose",
    "chose to",
    "will use",
    "instead of",
    "rather than",
    "because",
    "tradeoff",
    "trade-off",
    "went with",
    "settled on",
];

const TASK_CUES: &[&str] = &[
    "todo",
    "need to",
    "needs to",
    "should fix",
    "must fix",
    "implement",
    "refactor later",
    "follow up",
    "follow-up",
    "next step",
    "remaining",
    "blocked on",
];

const CONVENTION_CUES: &[&str] = &[
    "always",
    "never",
    "convention",
    "style",
    "naming",
    "pattern",
    "every file",
    "all files",
    "prefer",
    "do not use",
    "don't use",
    "rule:",
];

const FINDING_CUES: &[&str] = &[
    "found",
    "discovered",
    "turns out",
    "learned",
    "note that",
    "gotcha",
    "interesting",
    "apparently",
    "it seems",
    "observed",
];

fn score(text: &str, cues: &[&str]) -> u32 {
    cues.iter().filter(|cue| text.contains(*cue)).count() as u32
}

/// Classify a dump. The optional `hint` wins ties against equal scores.
pub fn classify(text: &str, hint: Option<DumpKind>) -> Classification {
    let lower = text.to_lowercase();

    let mut scores = BTreeMap::new();
    scores.insert("decision", score(&lower, DECISION_CUES));
    scores.insert("task", score(&lower, TASK_CUES));
    scores.insert("convention", score(&lower, CONVENTION_CUES));
    scores.insert("finding", score(&lower, FINDING_CUES));

    let best = *scores.values().max().unwrap_or(&0);
    if best == 0 {
        // Nothing matched: always a finding. The hint only breaks ties
        // among scoring leaders, it cannot promote contentless text into a
        // statistics-bearing table.
        return Classification {
            kind: DumpKind::Finding,
            confidence: DumpConfidence::Low,
            scores,
        };
    }

    let leaders: Vec<DumpKind> = scores
        .iter()
        .filter(|(_, v)| **v == best)
        .map(|(k, _)| k.parse().unwrap_or(DumpKind::Finding))
        .collect();

    let kind = match hint {
        Some(h) if leaders.contains(&h) => h,
        _ => leaders[0],
    };

    let runner_up = scores
        .iter()
        .filter(|(k, _)| **k != kind.as_str())
        .map(|(_, v)| *v)
        .max()
        .unwrap_or(0);

    let confidence = if best >= 3 && best > runner_up {
        DumpConfidence::High
    } else if best >= 2 || best > runner_up {
        DumpConfidence::Medium
    } else {
        DumpConfidence::Low
    };

    Classification {
        kind,
        confidence,
        scores,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_text() {
        let c = classify(
            "We decided to use sqlite instead of postgres because the tradeoff favors zero ops",
            None,
        );
        assert_eq!(c.kind, DumpKind::Decision);
        assert_eq!(c.confidence, DumpConfidence::High);
    }

    #[test]
    fn test_task_text() {
        let c = classify("TODO: need to implement retry logic as a follow up", None);
        assert_eq!(c.kind, DumpKind::Task);
    }

    #[test]
    fn test_convention_text() {
        let c = classify("Always prefer snake_case naming for modules", None);
        assert_eq!(c.kind, DumpKind::Convention);
    }

    #[test]
    fn test_zero_score_falls_to_finding() {
        let c = classify("xyzzy", None);
        assert_eq!(c.kind, DumpKind::Finding);
        assert_eq!(c.confidence, DumpConfidence::Low);
    }

    #[test]
    fn test_zero_score_ignores_hint() {
        // A hint cannot rescue contentless text from the finding fallback.
        let c = classify("xyzzy", Some(DumpKind::Task));
        assert_eq!(c.kind, DumpKind::Finding);
        assert_eq!(c.confidence, DumpConfidence::Low);
    }

    #[test]
    fn test_hint_breaks_ties() {
        // "prefer" hits convention, "because" hits decision: one cue each.
        let text = "prefer this because";
        let c = classify(text, Some(DumpKind::Decision));
        assert_eq!(c.kind, DumpKind::Decision);
        let c = classify(text, Some(DumpKind::Convention));
        assert_eq!(c.kind, DumpKind::Convention);
        // A hint that is not among the leaders does not override.
        let c = classify("we decided this because of the tradeoff", Some(DumpKind::Task));
        assert_eq!(c.kind, DumpKind::Decision);
    }
}
