use super::domain::{Action, AutomationRule, Combinator, Condition};
use crate::shared::sqlite::open_connection;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum RuleRepositoryError {
    #[error("sqlite open failed at {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: rusqlite::Error,
    },
    #[error("failed to create rule database parent {path}: {source}")]
    CreateParent {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("sqlite statement failed: {source}")]
    Sql {
        #[source]
        source: rusqlite::Error,
    },
    #[error("organization scope mismatch: expected {expected}, got {actual}")]
    OrganizationScopeMismatch { expected: String, actual: String },
    #[error("rule validation failed: {0}")]
    InvalidRule(String),
    #[error("rule `{rule_id}` not found")]
    UnknownRule { rule_id: String },
    #[error("stored rule `{rule_id}` is corrupt: {reason}")]
    CorruptRule { rule_id: String, reason: String },
}

/// Stored rule row that could not be turned into a rule at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptRuleRow {
    pub rule_id: String,
    pub reason: String,
}

/// Active rules in evaluation order plus the rows that failed to decode.
#[derive(Debug, Default)]
pub struct ActiveRuleSet {
    pub rules: Vec<AutomationRule>,
    pub corrupt: Vec<CorruptRuleRow>,
}

/// Rule storage for one organization.
pub struct RuleRepository {
    db_path: PathBuf,
    organization_id: String,
}

impl RuleRepository {
    pub fn open(db_path: &Path, organization_id: &str) -> Result<Self, RuleRepositoryError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|source| RuleRepositoryError::CreateParent {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let repo = Self {
            db_path: db_path.to_path_buf(),
            organization_id: organization_id.to_string(),
        };
        repo.ensure_schema()?;
        Ok(repo)
    }

    pub fn organization_id(&self) -> &str {
        &self.organization_id
    }

    fn ensure_schema(&self) -> Result<(), RuleRepositoryError> {
        let connection = self.connect()?;
        connection
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS automation_rules (
                    organization_id TEXT NOT NULL,
                    rule_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    description TEXT NOT NULL,
                    priority INTEGER NOT NULL,
                    is_active INTEGER NOT NULL,
                    exclusive INTEGER NOT NULL,
                    combinator TEXT NOT NULL,
                    halt_on_action_failure INTEGER NOT NULL,
                    conditions_json TEXT NOT NULL,
                    actions_json TEXT NOT NULL,
                    created_at INTEGER NOT NULL,
                    updated_at INTEGER NOT NULL,
                    creation_seq INTEGER NOT NULL,
                    PRIMARY KEY (organization_id, rule_id)
                );

                CREATE INDEX IF NOT EXISTS idx_automation_rules_order
                    ON automation_rules(organization_id, is_active, priority, creation_seq);
                ",
            )
            .map_err(|source| RuleRepositoryError::Sql { source })
    }

    /// Validates and upserts a rule. First save assigns `created_at` and the
    /// next `creation_seq`; later saves keep both.
    pub fn save_rule(
        &self,
        rule: &AutomationRule,
        now: i64,
    ) -> Result<AutomationRule, RuleRepositoryError> {
        self.ensure_scope(&rule.organization_id)?;
        rule.validate()
            .map_err(|err| RuleRepositoryError::InvalidRule(err.to_string()))?;

        let conditions_json = serde_json::to_string(&rule.conditions).map_err(|err| {
            RuleRepositoryError::InvalidRule(format!("conditions do not encode: {err}"))
        })?;
        let actions_json = serde_json::to_string(&rule.actions).map_err(|err| {
            RuleRepositoryError::InvalidRule(format!("actions do not encode: {err}"))
        })?;

        let mut connection = self.connect()?;
        let tx = connection
            .transaction()
            .map_err(|source| RuleRepositoryError::Sql { source })?;

        let existing: Option<(i64, i64)> = tx
            .query_row(
                "
                SELECT created_at, creation_seq FROM automation_rules
                WHERE organization_id = ?1 AND rule_id = ?2
                ",
                params![self.organization_id, rule.rule_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .map_err(|source| RuleRepositoryError::Sql { source })?;

        let (created_at, creation_seq) = match existing {
            Some(values) => values,
            None => {
                let max_seq: Option<i64> = tx
                    .query_row(
                        "SELECT MAX(creation_seq) FROM automation_rules WHERE organization_id = ?1",
                        params![self.organization_id],
                        |row| row.get(0),
                    )
                    .map_err(|source| RuleRepositoryError::Sql { source })?;
                (now, max_seq.unwrap_or(0) + 1)
            }
        };

        tx.execute(
            "
            INSERT INTO automation_rules (
                organization_id, rule_id, name, description, priority, is_active,
                exclusive, combinator, halt_on_action_failure, conditions_json,
                actions_json, created_at, updated_at, creation_seq
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
            ON CONFLICT(organization_id, rule_id) DO UPDATE SET
                name=excluded.name,
                description=excluded.description,
                priority=excluded.priority,
                is_active=excluded.is_active,
                exclusive=excluded.exclusive,
                combinator=excluded.combinator,
                halt_on_action_failure=excluded.halt_on_action_failure,
                conditions_json=excluded.conditions_json,
                actions_json=excluded.actions_json,
                updated_at=excluded.updated_at
            ",
            params![
                self.organization_id,
                rule.rule_id,
                rule.name.trim(),
                rule.description,
                rule.priority,
                rule.is_active,
                rule.exclusive,
                combinator_to_db(rule.combinator),
                rule.halt_on_action_failure,
                conditions_json,
                actions_json,
                created_at,
                now,
                creation_seq,
            ],
        )
        .map_err(|source| RuleRepositoryError::Sql { source })?;

        tx.commit()
            .map_err(|source| RuleRepositoryError::Sql { source })?;

        let mut saved = rule.clone();
        saved.name = rule.name.trim().to_string();
        saved.created_at = created_at;
        saved.creation_seq = creation_seq;
        Ok(saved)
    }

    pub fn load_rule(&self, rule_id: &str) -> Result<Option<AutomationRule>, RuleRepositoryError> {
        let connection = self.connect()?;
        let raw = connection
            .query_row(
                &format!("{SELECT_RULE} WHERE organization_id = ?1 AND rule_id = ?2"),
                params![self.organization_id, rule_id],
                map_raw_rule,
            )
            .optional()
            .map_err(|source| RuleRepositoryError::Sql { source })?;
        raw.map(decode_rule).transpose()
    }

    pub fn list_rules(&self) -> Result<Vec<AutomationRule>, RuleRepositoryError> {
        self.query_rules(false)
    }

    /// Active rules in evaluation order.
    pub fn list_active_rules(&self) -> Result<Vec<AutomationRule>, RuleRepositoryError> {
        self.query_rules(true)
    }

    /// Soft enable/disable. Rules are never hard-deleted so executions keep
    /// pointing at something.
    pub fn set_active(
        &self,
        rule_id: &str,
        is_active: bool,
        now: i64,
    ) -> Result<(), RuleRepositoryError> {
        let connection = self.connect()?;
        let updated = connection
            .execute(
                "
                UPDATE automation_rules SET is_active = ?3, updated_at = ?4
                WHERE organization_id = ?1 AND rule_id = ?2
                ",
                params![self.organization_id, rule_id, is_active, now],
            )
            .map_err(|source| RuleRepositoryError::Sql { source })?;
        if updated == 0 {
            return Err(RuleRepositoryError::UnknownRule {
                rule_id: rule_id.to_string(),
            });
        }
        Ok(())
    }

    /// Like `list_active_rules`, but a row that cannot be decoded is set
    /// aside instead of failing the whole listing.
    pub fn load_active_rule_set(&self) -> Result<ActiveRuleSet, RuleRepositoryError> {
        let mut set = ActiveRuleSet::default();
        for raw in self.query_raw_rules(true)? {
            match decode_rule(raw) {
                Ok(rule) => set.rules.push(rule),
                Err(RuleRepositoryError::CorruptRule { rule_id, reason }) => {
                    set.corrupt.push(CorruptRuleRow { rule_id, reason })
                }
                Err(other) => return Err(other),
            }
        }
        Ok(set)
    }

    fn query_rules(&self, active_only: bool) -> Result<Vec<AutomationRule>, RuleRepositoryError> {
        self.query_raw_rules(active_only)?
            .into_iter()
            .map(decode_rule)
            .collect()
    }

    fn query_raw_rules(&self, active_only: bool) -> Result<Vec<RawRule>, RuleRepositoryError> {
        let connection = self.connect()?;
        let filter = if active_only { "AND is_active = 1" } else { "" };
        let mut statement = connection
            .prepare(&format!(
                "{SELECT_RULE} WHERE organization_id = ?1 {filter}
                 ORDER BY priority ASC, creation_seq ASC, rule_id ASC"
            ))
            .map_err(|source| RuleRepositoryError::Sql { source })?;
        let rows = statement
            .query_map(params![self.organization_id], map_raw_rule)
            .map_err(|source| RuleRepositoryError::Sql { source })?;

        let raw_rules = rows
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| RuleRepositoryError::Sql { source })?;
        Ok(raw_rules)
    }

    fn ensure_scope(&self, organization_id: &str) -> Result<(), RuleRepositoryError> {
        if organization_id != self.organization_id {
            return Err(RuleRepositoryError::OrganizationScopeMismatch {
                expected: self.organization_id.clone(),
                actual: organization_id.to_string(),
            });
        }
        Ok(())
    }

    fn connect(&self) -> Result<Connection, RuleRepositoryError> {
        open_connection(&self.db_path).map_err(|source| RuleRepositoryError::Open {
            path: self.db_path.display().to_string(),
            source,
        })
    }
}

const SELECT_RULE: &str = "
    SELECT organization_id, rule_id, name, description, priority, is_active,
           exclusive, combinator, halt_on_action_failure, conditions_json,
           actions_json, created_at, creation_seq
    FROM automation_rules";

struct RawRule {
    organization_id: String,
    rule_id: String,
    name: String,
    description: String,
    priority: i64,
    is_active: bool,
    exclusive: bool,
    combinator: String,
    halt_on_action_failure: bool,
    conditions_json: String,
    actions_json: String,
    created_at: i64,
    creation_seq: i64,
}

fn map_raw_rule(row: &Row<'_>) -> Result<RawRule, rusqlite::Error> {
    Ok(RawRule {
        organization_id: row.get(0)?,
        rule_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        priority: row.get(4)?,
        is_active: row.get(5)?,
        exclusive: row.get(6)?,
        combinator: row.get(7)?,
        halt_on_action_failure: row.get(8)?,
        conditions_json: row.get(9)?,
        actions_json: row.get(10)?,
        created_at: row.get(11)?,
        creation_seq: row.get(12)?,
    })
}

fn decode_rule(raw: RawRule) -> Result<AutomationRule, RuleRepositoryError> {
    let corrupt = |reason: String| RuleRepositoryError::CorruptRule {
        rule_id: raw.rule_id.clone(),
        reason,
    };
    let combinator = combinator_from_db(&raw.combinator)
        .ok_or_else(|| corrupt(format!("unknown combinator `{}`", raw.combinator)))?;
    let conditions = decode_conditions(&raw.conditions_json).map_err(corrupt)?;
    let actions = decode_actions(&raw.actions_json).map_err(corrupt)?;

    Ok(AutomationRule {
        rule_id: raw.rule_id,
        organization_id: raw.organization_id,
        name: raw.name,
        description: raw.description,
        priority: raw.priority,
        is_active: raw.is_active,
        exclusive: raw.exclusive,
        combinator,
        halt_on_action_failure: raw.halt_on_action_failure,
        conditions,
        actions,
        created_at: raw.created_at,
        creation_seq: raw.creation_seq,
    })
}

/// Undecodable entries become `Condition::Unrecognized` so the rest of the
/// rule still evaluates.
pub fn decode_conditions(raw: &str) -> Result<Vec<Condition>, String> {
    let items: Vec<Value> =
        serde_json::from_str(raw).map_err(|err| format!("conditions are not a json list: {err}"))?;
    Ok(items
        .into_iter()
        .map(|item| {
            let raw_type = item
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("<missing>")
                .to_string();
            serde_json::from_value::<Condition>(item)
                .unwrap_or(Condition::Unrecognized { raw_type })
        })
        .collect())
}

/// Same treatment for actions: an unknown entry becomes
/// `Action::Unrecognized` and fails when dispatched.
pub fn decode_actions(raw: &str) -> Result<Vec<Action>, String> {
    let items: Vec<Value> =
        serde_json::from_str(raw).map_err(|err| format!("actions are not a json list: {err}"))?;
    Ok(items
        .into_iter()
        .map(|item| {
            let raw_type = item
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("<missing>")
                .to_string();
            serde_json::from_value::<Action>(item)
                .unwrap_or(Action::Unrecognized { raw_type })
        })
        .collect())
}

fn combinator_to_db(value: Combinator) -> &'static str {
    match value {
        Combinator::All => "all",
        Combinator::Any => "any",
    }
}

fn combinator_from_db(value: &str) -> Option<Combinator> {
    match value {
        "all" => Some(Combinator::All),
        "any" => Some(Combinator::Any),
        _ => None,
    }
}
