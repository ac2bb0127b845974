use super::repository::{ExecutionRepository, ExecutionRepositoryError};
use rusqlite::params;
use serde::Serialize;

/// Derived per-rule counters. Nothing here is stored on the rule itself.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleStats {
    pub rule_id: String,
    pub execution_count: u64,
    pub success_count: u64,
    pub success_rate: f64,
    pub last_executed_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationTotals {
    pub total_executions: u64,
    pub matched_executions: u64,
    pub successful_executions: u64,
    pub success_rate: f64,
    pub average_execution_time_ms: f64,
}

fn rate(success: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        success as f64 / total as f64
    }
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

impl ExecutionRepository {
    pub fn rule_stats(&self, rule_id: &str) -> Result<RuleStats, ExecutionRepositoryError> {
        let (executions, successes, last) = self
            .connect()?
            .query_row(
                "
                SELECT COUNT(*), COALESCE(SUM(success), 0), MAX(created_at)
                FROM automation_executions
                WHERE organization_id = ?1 AND rule_id = ?2
                ",
                params![self.organization_id(), rule_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                    ))
                },
            )
            .map_err(|source| ExecutionRepositoryError::Sql { source })?;
        let execution_count = count(executions);
        let success_count = count(successes);
        Ok(RuleStats {
            rule_id: rule_id.to_string(),
            execution_count,
            success_count,
            success_rate: rate(success_count, execution_count),
            last_executed_at: last,
        })
    }

    /// Stats for every rule that has at least one recorded execution.
    pub fn all_rule_stats(&self) -> Result<Vec<RuleStats>, ExecutionRepositoryError> {
        let connection = self.connect()?;
        let mut statement = connection
            .prepare(
                "
                SELECT rule_id, COUNT(*), COALESCE(SUM(success), 0), MAX(created_at)
                FROM automation_executions
                WHERE organization_id = ?1 AND rule_id IS NOT NULL
                GROUP BY rule_id
                ORDER BY rule_id ASC
                ",
            )
            .map_err(|source| ExecutionRepositoryError::Sql { source })?;
        let rows = statement
            .query_map(params![self.organization_id()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                ))
            })
            .map_err(|source| ExecutionRepositoryError::Sql { source })?;

        let mut out = Vec::new();
        for row in rows {
            let (rule_id, executions, successes, last) =
                row.map_err(|source| ExecutionRepositoryError::Sql { source })?;
            let execution_count = count(executions);
            let success_count = count(successes);
            out.push(RuleStats {
                rule_id,
                execution_count,
                success_count,
                success_rate: rate(success_count, execution_count),
                last_executed_at: last,
            });
        }
        Ok(out)
    }

    pub fn organization_totals(&self) -> Result<OrganizationTotals, ExecutionRepositoryError> {
        let (total, matched, successful, average) = self
            .connect()?
            .query_row(
                "
                SELECT
                    COUNT(*),
                    COALESCE(SUM(CASE WHEN outcome = 'matched' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(success), 0),
                    COALESCE(AVG(execution_time_ms), 0.0)
                FROM automation_executions
                WHERE organization_id = ?1
                ",
                params![self.organization_id()],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, f64>(3)?,
                    ))
                },
            )
            .map_err(|source| ExecutionRepositoryError::Sql { source })?;
        let matched_executions = count(matched);
        let successful_executions = count(successful);
        Ok(OrganizationTotals {
            total_executions: count(total),
            matched_executions,
            successful_executions,
            success_rate: rate(successful_executions, matched_executions),
            average_execution_time_ms: average,
        })
    }
}
