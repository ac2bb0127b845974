pub mod condition;
pub mod domain;
pub mod evaluator;
pub mod repository;

pub use condition::{match_condition, ConditionResult, MatchError};
pub use domain::{
    Action, ActionKind, AttributeOperator, AutomationRule, Combinator, Condition, ConditionKind,
    KeywordOperator, RuleValidationError, Weekday,
};
pub use evaluator::{
    evaluate, EvaluationOutcome, RuleEvaluation, RuleExecutionMode, RuleMatch,
};
pub use repository::{ActiveRuleSet, CorruptRuleRow, RuleRepository, RuleRepositoryError};
