// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Metered features and monthly usage counters.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Which pass dimension a feature belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureDomain {
    General,
    Nursing,
}

/// Metered feature keys. The set is closed; unknown keys are rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub enum Feature {
    AiInterviewer,
    PracticeMode,
    AnswerAssistant,
    QuestionGen,
    LivePrompterQuestions,
    NursingPractice,
    NursingMock,
    NursingSbar,
    NursingCoach,
}

impl Feature {
    pub const ALL: [Feature; 9] = [
        Feature::AiInterviewer,
        Feature::PracticeMode,
        Feature::AnswerAssistant,
        Feature::QuestionGen,
        Feature::LivePrompterQuestions,
        Feature::NursingPractice,
        Feature::NursingMock,
        Feature::NursingSbar,
        Feature::NursingCoach,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Feature::AiInterviewer => "ai_interviewer",
            Feature::PracticeMode => "practice_mode",
            Feature::AnswerAssistant => "answer_assistant",
            Feature::QuestionGen => "question_gen",
            Feature::LivePrompterQuestions => "live_prompter_questions",
            Feature::NursingPractice => "nursing_practice",
            Feature::NursingMock => "nursing_mock",
            Feature::NursingSbar => "nursing_sbar",
            Feature::NursingCoach => "nursing_coach",
        }
    }

    pub fn domain(&self) -> FeatureDomain {
        match self {
            Feature::AiInterviewer
            | Feature::PracticeMode
            | Feature::AnswerAssistant
            | Feature::QuestionGen
            | Feature::LivePrompterQuestions => FeatureDomain::General,
            Feature::NursingPractice
            | Feature::NursingMock
            | Feature::NursingSbar
            | Feature::NursingCoach => FeatureDomain::Nursing,
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error for a feature key outside the closed set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown feature key '{0}'")]
pub struct UnknownFeature(pub String);

impl FromStr for Feature {
    type Err = UnknownFeature;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Feature::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| UnknownFeature(s.to_string()))
    }
}

/// Usage counters for one user and one calendar month.
///
/// Stored at `usage/{user_id}_{period}`. Counters are only ever changed by
/// server-side increment transforms.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsagePeriod {
    #[serde(default)]
    pub user_id: String,
    /// "YYYY-MM" (UTC)
    #[serde(default)]
    pub period: String,
    /// Count per feature key
    #[serde(default)]
    pub counts: HashMap<String, i64>,
}

impl UsagePeriod {
    pub fn document_id(user_id: &str, period: &str) -> String {
        format!("{}_{}", user_id, period)
    }

    /// Current count for a feature; missing or negative values read as zero.
    pub fn count(&self, feature: Feature) -> i64 {
        self.counts
            .get(feature.as_str())
            .copied()
            .unwrap_or(0)
            .max(0)
    }
}
