use super::ports::{ClaimOutcome, DeliveryLedger, PortError};
use crate::shared::sqlite::open_connection;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Stable key for one action of one rule reacting to one inbound message.
pub fn compute_action_correlation_key(
    organization_id: &str,
    conversation_id: &str,
    message_id: &str,
    rule_id: &str,
    position: usize,
) -> String {
    let mut hasher = Sha256::new();
    for part in [organization_id, conversation_id, message_id, rule_id] {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }
    hasher.update((position as u64).to_le_bytes());
    to_hex(&hasher.finalize())
}

/// Key for the knowledge-based auto reply to one inbound message.
pub fn compute_auto_reply_correlation_key(
    organization_id: &str,
    conversation_id: &str,
    message_id: &str,
) -> String {
    let mut hasher = Sha256::new();
    for part in [organization_id, conversation_id, message_id, "auto_response"] {
        hasher.update(part.as_bytes());
        hasher.update([0]);
    }
    to_hex(&hasher.finalize())
}

fn to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    const HEX: &[u8; 16] = b"0123456789abcdef";
    for byte in bytes {
        out.push(HEX[(byte >> 4) as usize] as char);
        out.push(HEX[(byte & 0x0f) as usize] as char);
    }
    out
}

pub struct SqliteDeliveryLedger {
    db_path: PathBuf,
}

impl SqliteDeliveryLedger {
    pub fn open(db_path: &Path) -> Result<Self, PortError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent).map_err(|err| {
                PortError::Store(format!(
                    "failed to create ledger parent {}: {err}",
                    parent.display()
                ))
            })?;
        }
        let ledger = Self {
            db_path: db_path.to_path_buf(),
        };
        ledger
            .connect()?
            .execute_batch(
                "
                CREATE TABLE IF NOT EXISTS delivery_ledger (
                    organization_id TEXT NOT NULL,
                    correlation_key TEXT NOT NULL,
                    state TEXT NOT NULL,
                    provider_message_id TEXT,
                    claimed_at INTEGER NOT NULL,
                    completed_at INTEGER,
                    PRIMARY KEY (organization_id, correlation_key)
                );
                ",
            )
            .map_err(sql_error)?;
        Ok(ledger)
    }

    pub fn state_of(&self, organization_id: &str, key: &str) -> Result<Option<String>, PortError> {
        self.connect()?
            .query_row(
                "
                SELECT state FROM delivery_ledger
                WHERE organization_id = ?1 AND correlation_key = ?2
                ",
                params![organization_id, key],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_error)
    }

    fn connect(&self) -> Result<Connection, PortError> {
        open_connection(&self.db_path).map_err(|err| {
            PortError::Store(format!(
                "sqlite open failed at {}: {err}",
                self.db_path.display()
            ))
        })
    }
}

impl DeliveryLedger for SqliteDeliveryLedger {
    fn claim(
        &self,
        organization_id: &str,
        key: &str,
        now: i64,
    ) -> Result<ClaimOutcome, PortError> {
        let connection = self.connect()?;
        let inserted = connection
            .execute(
                "
                INSERT INTO delivery_ledger (organization_id, correlation_key, state, claimed_at)
                VALUES (?1, ?2, 'pending', ?3)
                ON CONFLICT(organization_id, correlation_key) DO NOTHING
                ",
                params![organization_id, key, now],
            )
            .map_err(sql_error)?;
        if inserted == 1 {
            return Ok(ClaimOutcome::Claimed);
        }
        let state: String = connection
            .query_row(
                "
                SELECT state FROM delivery_ledger
                WHERE organization_id = ?1 AND correlation_key = ?2
                ",
                params![organization_id, key],
                |row| row.get(0),
            )
            .map_err(sql_error)?;
        Ok(if state == "delivered" {
            ClaimOutcome::AlreadyDelivered
        } else {
            ClaimOutcome::Pending
        })
    }

    fn complete(
        &self,
        organization_id: &str,
        key: &str,
        provider_message_id: Option<&str>,
        now: i64,
    ) -> Result<(), PortError> {
        self.connect()?
            .execute(
                "
                UPDATE delivery_ledger
                SET state = 'delivered', provider_message_id = ?3, completed_at = ?4
                WHERE organization_id = ?1 AND correlation_key = ?2
                ",
                params![organization_id, key, provider_message_id, now],
            )
            .map_err(sql_error)?;
        Ok(())
    }

    fn release(&self, organization_id: &str, key: &str) -> Result<(), PortError> {
        self.connect()?
            .execute(
                "
                DELETE FROM delivery_ledger
                WHERE organization_id = ?1 AND correlation_key = ?2 AND state = 'pending'
                ",
                params![organization_id, key],
            )
            .map_err(sql_error)?;
        Ok(())
    }
}

fn sql_error(err: rusqlite::Error) -> PortError {
    PortError::Store(format!("sqlite statement failed: {err}"))
}
