use super::condition::{match_condition, ConditionResult};
use super::domain::{AutomationRule, Combinator, ConditionKind};
use crate::inbound::{Contact, NormalizedMessage};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleExecutionMode {
    #[default]
    FirstMatch,
    AllMatches,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleEvaluation {
    pub rule_id: String,
    pub rule_name: String,
    pub matched: bool,
    /// Results in condition order, up to the short-circuit point.
    pub condition_results: Vec<ConditionResult>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub rule: AutomationRule,
    pub detected_intentions: BTreeSet<String>,
    pub matched_keywords: Vec<String>,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EvaluationOutcome {
    pub matched: Vec<RuleMatch>,
    pub rule_results: Vec<RuleEvaluation>,
}

impl EvaluationOutcome {
    pub fn matched_rule(&self) -> Option<&RuleMatch> {
        self.matched.first()
    }

    pub fn is_no_match(&self) -> bool {
        self.matched.is_empty()
    }

    pub fn condition_results(&self) -> impl Iterator<Item = &ConditionResult> {
        self.rule_results
            .iter()
            .flat_map(|evaluation| evaluation.condition_results.iter())
    }
}

/// Ascending priority, then save order, then id. Stable across runs.
pub fn compare_rule_order(a: &AutomationRule, b: &AutomationRule) -> Ordering {
    a.priority
        .cmp(&b.priority)
        .then_with(|| a.creation_seq.cmp(&b.creation_seq))
        .then_with(|| a.rule_id.cmp(&b.rule_id))
}

pub fn evaluate(
    rules: &[AutomationRule],
    message: &NormalizedMessage,
    contact: &Contact,
    mode: RuleExecutionMode,
) -> EvaluationOutcome {
    let mut ordered = rules.iter().filter(|rule| rule.is_active).collect::<Vec<_>>();
    ordered.sort_by(|a, b| compare_rule_order(a, b));

    let mut outcome = EvaluationOutcome::default();
    for rule in ordered {
        let evaluation = evaluate_rule(rule, message, contact);
        let matched = evaluation.matched;
        if matched {
            outcome
                .matched
                .push(build_match(rule, &evaluation.condition_results));
        }
        outcome.rule_results.push(evaluation);

        if matched && mode == RuleExecutionMode::FirstMatch && rule.exclusive {
            break;
        }
    }
    outcome
}

pub fn evaluate_rule(
    rule: &AutomationRule,
    message: &NormalizedMessage,
    contact: &Contact,
) -> RuleEvaluation {
    let mut condition_results = Vec::with_capacity(rule.conditions.len());
    let matched = if rule.conditions.is_empty() {
        false
    } else {
        match rule.combinator {
            Combinator::All => {
                let mut all = true;
                for condition in &rule.conditions {
                    let result = match_condition(condition, message, contact);
                    let hit = result.matched;
                    condition_results.push(result);
                    if !hit {
                        all = false;
                        break;
                    }
                }
                all
            }
            Combinator::Any => {
                let mut any = false;
                for condition in &rule.conditions {
                    let result = match_condition(condition, message, contact);
                    let hit = result.matched;
                    condition_results.push(result);
                    if hit {
                        any = true;
                        break;
                    }
                }
                any
            }
        }
    };

    RuleEvaluation {
        rule_id: rule.rule_id.clone(),
        rule_name: rule.name.clone(),
        matched,
        condition_results,
    }
}

fn build_match(rule: &AutomationRule, results: &[ConditionResult]) -> RuleMatch {
    let mut detected_intentions = BTreeSet::new();
    let mut matched_keywords = Vec::new();
    let mut scores = Vec::new();

    for result in results.iter().filter(|result| result.matched) {
        if let Some(value) = &result.matched_value {
            match result.kind {
                ConditionKind::Intent => {
                    detected_intentions.insert(value.clone());
                }
                ConditionKind::Keyword => {
                    detected_intentions.insert(value.clone());
                    if !matched_keywords.contains(value) {
                        matched_keywords.push(value.clone());
                    }
                }
                _ => {}
            }
        }
        scores.push(result.score.unwrap_or(1.0));
    }

    let confidence = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f32>() / scores.len() as f32
    };

    RuleMatch {
        rule: rule.clone(),
        detected_intentions,
        matched_keywords,
        confidence: confidence.clamp(0.0, 1.0),
    }
}
