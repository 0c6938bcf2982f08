//! `SQLite` implementation of [`ConfigStore`].

use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;

use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, SqlitePool};

use telederive_app::ports::ConfigStore;
use telederive_domain::device::{DeviceIdentity, DeviceState};
use telederive_domain::error::DeriveError;
use telederive_domain::id::{CostRuleId, EfficiencyRuleId};
use telederive_domain::rule::{CostRule, EfficiencyRule, LoadTerm, PowerSource};
use telederive_domain::telemetry::Values;
use telederive_domain::time::{parse_iso8601, to_iso8601};

use crate::error::StorageError;

fn decode<E: std::error::Error + Send + Sync + 'static>(err: E) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(err))
}

struct CostRuleRow(CostRule);

impl<'r> FromRow<'r, SqliteRow> for CostRuleRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let device_id: String = row.try_get("device_id")?;
        let device_topic: String = row.try_get("device_topic")?;

        Ok(Self(CostRule {
            id: CostRuleId::from_str(&id).map_err(decode)?,
            label: row.try_get("label")?,
            source_device: DeviceIdentity::new(device_id, device_topic),
            source_key: row.try_get("source_key")?,
            rate_a: row.try_get("rate_a")?,
            rate_b: row.try_get("rate_b")?,
            target_topic: row.try_get("target_topic")?,
            target_address: row.try_get("target_address")?,
        }))
    }
}

/// Efficiency rule header, load terms are attached afterwards.
struct EfficiencyRuleRow(EfficiencyRule);

impl<'r> FromRow<'r, SqliteRow> for EfficiencyRuleRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let device_id: String = row.try_get("main_device_id")?;
        let device_topic: String = row.try_get("main_device_topic")?;

        Ok(Self(EfficiencyRule {
            id: EfficiencyRuleId::from_str(&id).map_err(decode)?,
            label: row.try_get("label")?,
            main_power: PowerSource {
                device: DeviceIdentity::new(device_id, device_topic),
                key: row.try_get("main_key")?,
            },
            load_terms: Vec::new(),
            output_topic: row.try_get("output_topic")?,
        }))
    }
}

struct LoadTermRow {
    rule_id: EfficiencyRuleId,
    term: LoadTerm,
}

impl<'r> FromRow<'r, SqliteRow> for LoadTermRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let rule_id: String = row.try_get("rule_id")?;
        let device_id: String = row.try_get("device_id")?;
        let device_topic: String = row.try_get("device_topic")?;
        let keys: String = row.try_get("keys")?;

        Ok(Self {
            rule_id: EfficiencyRuleId::from_str(&rule_id).map_err(decode)?,
            term: LoadTerm {
                device: DeviceIdentity::new(device_id, device_topic),
                keys: serde_json::from_str(&keys).map_err(decode)?,
            },
        })
    }
}

struct DeviceRow(DeviceIdentity);

impl<'r> FromRow<'r, SqliteRow> for DeviceRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let topic: String = row.try_get("topic")?;
        Ok(Self(DeviceIdentity::new(id, topic)))
    }
}

struct LastKnownRow(DeviceState);

impl<'r> FromRow<'r, SqliteRow> for LastKnownRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let id: String = row.try_get("id")?;
        let topic: String = row.try_get("topic")?;
        let value: String = row.try_get("last_known_value")?;
        let seen_at: String = row.try_get("last_seen_at")?;

        let values: Values = serde_json::from_str(&value).map_err(decode)?;
        Ok(Self(DeviceState::new(
            DeviceIdentity::new(id, topic),
            values,
            parse_iso8601(&seen_at).map_err(decode)?,
        )))
    }
}

const SELECT_COST_RULES: &str = "SELECT r.id, r.label, r.source_key, r.rate_a, r.rate_b, \
    r.target_topic, r.target_address, d.id AS device_id, d.topic AS device_topic \
    FROM cost_rules r JOIN devices d ON d.id = r.device_id \
    WHERE r.enabled = 1 ORDER BY r.id";
const SELECT_EFFICIENCY_RULES: &str = "SELECT r.id, r.label, r.main_key, r.output_topic, \
    d.id AS main_device_id, d.topic AS main_device_topic \
    FROM efficiency_rules r JOIN devices d ON d.id = r.main_device_id \
    WHERE r.enabled = 1 ORDER BY r.id";
const SELECT_LOAD_TERMS: &str = "SELECT t.rule_id, t.keys, d.id AS device_id, d.topic AS device_topic \
    FROM efficiency_load_terms t \
    JOIN efficiency_rules r ON r.id = t.rule_id \
    JOIN devices d ON d.id = t.device_id \
    WHERE r.enabled = 1 ORDER BY t.rule_id, t.position";
const SELECT_DEVICE_BY_TOPIC: &str = "SELECT id, topic FROM devices WHERE topic = ?";
const UPDATE_LAST_KNOWN: &str =
    "UPDATE devices SET last_known_value = ?, last_seen_at = ? WHERE id = ?";
const SELECT_LAST_KNOWN: &str = "SELECT id, topic, last_known_value, last_seen_at FROM devices \
    WHERE last_known_value IS NOT NULL AND last_seen_at IS NOT NULL";

/// `SQLite`-backed configuration store.
#[derive(Clone)]
pub struct SqliteConfigStore {
    pool: SqlitePool,
}

impl SqliteConfigStore {
    /// Create a new store using the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl ConfigStore for SqliteConfigStore {
    fn list_cost_rules(&self) -> impl Future<Output = Result<Vec<CostRule>, DeriveError>> + Send {
        let pool = self.pool.clone();
        async move {
            let rows: Vec<CostRuleRow> = sqlx::query_as(SELECT_COST_RULES)
                .fetch_all(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(rows.into_iter().map(|row| row.0).collect())
        }
    }

    fn list_efficiency_rules(
        &self,
    ) -> impl Future<Output = Result<Vec<EfficiencyRule>, DeriveError>> + Send {
        let pool = self.pool.clone();
        async move {
            let rules: Vec<EfficiencyRuleRow> = sqlx::query_as(SELECT_EFFICIENCY_RULES)
                .fetch_all(&pool)
                .await
                .map_err(StorageError::from)?;
            let terms: Vec<LoadTermRow> = sqlx::query_as(SELECT_LOAD_TERMS)
                .fetch_all(&pool)
                .await
                .map_err(StorageError::from)?;

            let mut by_rule: HashMap<EfficiencyRuleId, Vec<LoadTerm>> = HashMap::new();
            for row in terms {
                by_rule.entry(row.rule_id).or_default().push(row.term);
            }

            Ok(rules
                .into_iter()
                .map(|row| {
                    let mut rule = row.0;
                    rule.load_terms = by_rule.remove(&rule.id).unwrap_or_default();
                    rule
                })
                .collect())
        }
    }

    fn find_device_by_topic(
        &self,
        topic: &str,
    ) -> impl Future<Output = Result<Option<DeviceIdentity>, DeriveError>> + Send {
        let pool = self.pool.clone();
        let topic = topic.to_string();
        async move {
            let row: Option<DeviceRow> = sqlx::query_as(SELECT_DEVICE_BY_TOPIC)
                .bind(&topic)
                .fetch_optional(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(row.map(|row| row.0))
        }
    }

    fn write_last_known_value(
        &self,
        state: &DeviceState,
    ) -> impl Future<Output = Result<(), DeriveError>> + Send {
        let pool = self.pool.clone();
        let id = state.device.id.to_string();
        let seen_at = to_iso8601(state.updated_at);
        let encoded = serde_json::to_string(&state.values);
        async move {
            let encoded = encoded.map_err(StorageError::from)?;
            let result = sqlx::query(UPDATE_LAST_KNOWN)
                .bind(encoded)
                .bind(seen_at)
                .bind(&id)
                .execute(&pool)
                .await
                .map_err(StorageError::from)?;

            if result.rows_affected() == 0 {
                tracing::debug!(device = %id, "no device row to hold last known value");
            }
            Ok(())
        }
    }

    fn list_last_known_values(
        &self,
    ) -> impl Future<Output = Result<Vec<DeviceState>, DeriveError>> + Send {
        let pool = self.pool.clone();
        async move {
            let rows: Vec<LastKnownRow> = sqlx::query_as(SELECT_LAST_KNOWN)
                .fetch_all(&pool)
                .await
                .map_err(StorageError::from)?;

            Ok(rows.into_iter().map(|row| row.0).collect())
        }
    }
}
