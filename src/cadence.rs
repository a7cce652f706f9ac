//! Follow-up cadence rules keyed by lead source.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::campaign_lead::LeadSource;

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CadenceRule {
    pub source: String,
    pub max_follow_ups: u32,
    /// Days after the last contact for each follow-up, in order.
    pub schedule_offsets_days: Vec<i64>,
    pub description: String,
}

impl CadenceRule {
    pub fn new(source: &str, schedule_offsets_days: &[i64], description: &str) -> CadenceRule {
        CadenceRule {
            source: source.to_owned(),
            max_follow_ups: schedule_offsets_days.len() as u32,
            schedule_offsets_days: schedule_offsets_days.to_vec(),
            description: description.to_owned(),
        }
    }

    fn fallback(source: &str) -> CadenceRule {
        CadenceRule {
            source: source.to_owned(),
            max_follow_ups: 0,
            schedule_offsets_days: vec![],
            description: "Unknown source: no follow-ups".to_owned(),
        }
    }
}

/// Read-only lookup of the rule that governs a source.
pub trait CadenceRules: Send + Sync {
    /// Sources without an entry get a rule with no follow-ups.
    fn rule(&self, source: &LeadSource) -> CadenceRule;

    fn all_rules(&self) -> Vec<CadenceRule>;
}

#[derive(Clone, Debug)]
pub struct CadenceTable {
    rules: HashMap<LeadSource, CadenceRule>,
    order: Vec<LeadSource>,
}

impl CadenceTable {
    pub fn new(rules: Vec<(LeadSource, CadenceRule)>) -> CadenceTable {
        let order = rules.iter().map(|(source, _)| source.clone()).collect();
        CadenceTable {
            rules: rules.into_iter().collect(),
            order,
        }
    }
}

impl Default for CadenceTable {
    fn default() -> CadenceTable {
        CadenceTable::new(vec![
            (
                LeadSource::PastClient,
                CadenceRule::new("PAST_CLIENT", &[7], "Warm leads: single follow-up after 1 week"),
            ),
            (
                LeadSource::Dormant,
                CadenceRule::new("DORMANT", &[5, 12], "Re-engagement: two follow-ups"),
            ),
            (
                LeadSource::SimilarOrg,
                CadenceRule::new("SIMILAR_ORG", &[], "Cold outreach: no automated follow-ups"),
            ),
            (
                LeadSource::AiResearch,
                CadenceRule::new("AI_RESEARCH", &[], "AI-discovered leads: no follow-ups"),
            ),
            (
                LeadSource::ManualImport,
                CadenceRule::new("MANUAL_IMPORT", &[], "Manual imports: no follow-ups"),
            ),
        ])
    }
}

impl CadenceRules for CadenceTable {
    fn rule(&self, source: &LeadSource) -> CadenceRule {
        self.rules
            .get(source)
            .cloned()
            .unwrap_or_else(|| CadenceRule::fallback(source.as_str()))
    }

    fn all_rules(&self) -> Vec<CadenceRule> {
        self.order
            .iter()
            .filter_map(|source| self.rules.get(source).cloned())
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FollowUpPlan {
    pub should_follow_up: bool,
    pub next_date: Option<DateTime<Utc>>,
    /// The 1-based number of the follow-up this plan is for.
    pub follow_up_number: u32,
    pub days_from_anchor: i64,
}

/// Works out when follow-up `current_count + 1` is due, measured from
/// `anchor`.
pub fn calculate_next_follow_up(
    rules: &dyn CadenceRules,
    source: &LeadSource,
    current_count: u32,
    anchor: DateTime<Utc>,
) -> FollowUpPlan {
    let rule = rules.rule(source);
    let follow_up_number = current_count + 1;

    let offset = if current_count >= rule.max_follow_ups {
        None
    } else {
        rule.schedule_offsets_days
            .get(current_count as usize)
            .copied()
    };

    match offset {
        Some(days) => FollowUpPlan {
            should_follow_up: true,
            next_date: Some(anchor + Duration::days(days)),
            follow_up_number,
            days_from_anchor: days,
        },
        None => FollowUpPlan {
            should_follow_up: false,
            next_date: None,
            follow_up_number,
            days_from_anchor: 0,
        },
    }
}

pub fn should_schedule_follow_up(rules: &dyn CadenceRules, source: &LeadSource) -> bool {
    rules.rule(source).max_follow_ups > 0
}
