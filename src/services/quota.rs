// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-tier monthly limits and allow/deny decisions.
//!
//! The limit table is an exhaustive match over (tier, feature): adding a
//! tier or a feature does not compile until every cell is filled in.

use crate::models::{Feature, Tier};
use serde::Serialize;
#[cfg(feature = "binding-generation")]
use ts_rs::TS;

/// Sentinel limit meaning "effectively unlimited".
pub const UNLIMITED: i64 = 999_999;

const FREE_AI_INTERVIEWER: i64 = 3;
const FREE_PRACTICE_MODE: i64 = 10;
const FREE_ANSWER_ASSISTANT: i64 = 5;
const FREE_QUESTION_GEN: i64 = 5;
const FREE_LIVE_PROMPTER: i64 = 10;
const FREE_NURSING_PRACTICE: i64 = 5;
const FREE_NURSING_MOCK: i64 = 1;
const FREE_NURSING_SBAR: i64 = 3;
const FREE_NURSING_COACH: i64 = 3;

fn free_limit(feature: Feature) -> i64 {
    match feature {
        Feature::AiInterviewer => FREE_AI_INTERVIEWER,
        Feature::PracticeMode => FREE_PRACTICE_MODE,
        Feature::AnswerAssistant => FREE_ANSWER_ASSISTANT,
        Feature::QuestionGen => FREE_QUESTION_GEN,
        Feature::LivePrompterQuestions => FREE_LIVE_PROMPTER,
        Feature::NursingPractice => FREE_NURSING_PRACTICE,
        Feature::NursingMock => FREE_NURSING_MOCK,
        Feature::NursingSbar => FREE_NURSING_SBAR,
        Feature::NursingCoach => FREE_NURSING_COACH,
    }
}

/// Monthly limit for a feature at a tier.
pub fn limit_for(tier: Tier, feature: Feature) -> i64 {
    use Feature::*;

    match tier {
        Tier::Beta | Tier::Annual => UNLIMITED,
        Tier::Free => free_limit(feature),
        Tier::Pro => match feature {
            AiInterviewer | PracticeMode | AnswerAssistant | QuestionGen => UNLIMITED,
            LivePrompterQuestions => 50,
            NursingPractice | NursingMock | NursingSbar | NursingCoach => free_limit(feature),
        },
        Tier::GeneralPass => match feature {
            AiInterviewer | PracticeMode | AnswerAssistant | QuestionGen => UNLIMITED,
            LivePrompterQuestions => 100,
            NursingPractice | NursingMock | NursingSbar | NursingCoach => free_limit(feature),
        },
        Tier::NursingPass => match feature {
            NursingPractice | NursingMock | NursingSbar | NursingCoach => UNLIMITED,
            AiInterviewer | PracticeMode | AnswerAssistant | QuestionGen
            | LivePrompterQuestions => free_limit(feature),
        },
    }
}

/// Result of a usage check; also the usage endpoint's JSON body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "binding-generation", derive(TS))]
#[cfg_attr(
    feature = "binding-generation",
    ts(export, export_to = "web/src/lib/generated/")
)]
pub struct QuotaDecision {
    pub allowed: bool,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub used: i64,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub limit: i64,
    #[cfg_attr(feature = "binding-generation", ts(type = "number"))]
    pub remaining: i64,
    pub tier: Tier,
    pub unlimited: bool,
}

/// Decide whether one more use of `feature` is allowed.
///
/// Reaching the limit blocks the next call, not the call that reached it.
/// Does not increment anything.
pub fn check_quota(tier: Tier, feature: Feature, used: i64) -> QuotaDecision {
    let used = used.max(0);
    let limit = limit_for(tier, feature);
    let unlimited = limit >= UNLIMITED;

    QuotaDecision {
        allowed: unlimited || used < limit,
        used,
        limit,
        remaining: if unlimited {
            UNLIMITED
        } else {
            (limit - used).max(0)
        },
        tier,
        unlimited,
    }
}
