#![allow(clippy::needless_update)]

use sea_orm::entity::prelude::*;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{ActiveValue, DatabaseConnection, DbErr, EntityTrait, ExprTrait, QueryFilter, Schema};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use relaygate_provider_core::ChannelStatus;

use crate::db;
use crate::entities;
use crate::snapshot::{AccountRow, ChannelRow, StorageSnapshot, TokenRow};

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("db error: {0}")]
    Db(#[from] DbErr),
    #[error("serde json error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct AccountInput {
    pub id: Option<i64>,
    pub name: String,
    pub quota: i64,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct TokenInput {
    pub id: Option<i64>,
    pub account_id: i64,
    pub key: String,
    pub name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct ChannelInput {
    pub id: Option<i64>,
    pub name: String,
    pub channel_type: String,
    pub base_url: Option<String>,
    pub key: String,
    pub config_json: JsonValue,
    pub ratio: f64,
    pub weight: i32,
    pub priority: i32,
    pub status: i32,
}

/// Boot-time loader and write target for the async writers.
///
/// Runtime reads never come through here; the relay serves from snapshots.
#[derive(Clone)]
pub struct RelayStorage {
    db: DatabaseConnection,
}

impl RelayStorage {
    pub async fn connect(database_url: &str) -> StorageResult<Self> {
        let db = db::connect(database_url).await?;
        Ok(Self { db })
    }

    pub fn from_connection(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Accounts)
            .register(entities::Tokens)
            .register(entities::Channels)
            .register(entities::UserRequestCosts)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    pub async fn load_snapshot(&self) -> StorageResult<StorageSnapshot> {
        let accounts = entities::Accounts::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|row| AccountRow {
                id: row.id,
                name: row.name,
                quota: row.quota,
                used_quota: row.used_quota,
                enabled: row.enabled,
            })
            .collect();
        let tokens = entities::Tokens::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|row| TokenRow {
                id: row.id,
                account_id: row.account_id,
                key: row.key,
                name: row.name,
                enabled: row.enabled,
            })
            .collect();
        let channels = entities::Channels::find()
            .all(&self.db)
            .await?
            .into_iter()
            .map(|row| ChannelRow {
                id: row.id,
                name: row.name,
                channel_type: row.channel_type,
                base_url: row.base_url,
                key: row.key,
                config_json: row.config,
                ratio: row.ratio,
                weight: row.weight,
                priority: row.priority,
                status: row.status,
                updated_at: row.updated_at,
            })
            .collect();
        Ok(StorageSnapshot {
            accounts,
            tokens,
            channels,
        })
    }

    pub async fn upsert_account(&self, input: AccountInput) -> StorageResult<i64> {
        use entities::accounts::Column;

        let now = OffsetDateTime::now_utc();
        let active = entities::accounts::ActiveModel {
            id: input.id.map(ActiveValue::Set).unwrap_or(ActiveValue::NotSet),
            name: ActiveValue::Set(input.name),
            quota: ActiveValue::Set(input.quota),
            used_quota: ActiveValue::Set(0),
            enabled: ActiveValue::Set(input.enabled),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        let result = entities::Accounts::insert(active)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns([Column::Name, Column::Quota, Column::Enabled, Column::UpdatedAt])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(input.id.unwrap_or(result.last_insert_id))
    }

    pub async fn upsert_token(&self, input: TokenInput) -> StorageResult<i64> {
        use entities::tokens::Column;

        let now = OffsetDateTime::now_utc();
        let active = entities::tokens::ActiveModel {
            id: input.id.map(ActiveValue::Set).unwrap_or(ActiveValue::NotSet),
            account_id: ActiveValue::Set(input.account_id),
            key: ActiveValue::Set(input.key),
            name: ActiveValue::Set(input.name),
            enabled: ActiveValue::Set(input.enabled),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        let result = entities::Tokens::insert(active)
            .on_conflict(
                OnConflict::column(Column::Key)
                    .update_columns([
                        Column::AccountId,
                        Column::Name,
                        Column::Enabled,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(input.id.unwrap_or(result.last_insert_id))
    }

    pub async fn upsert_channel(&self, input: ChannelInput) -> StorageResult<i64> {
        use entities::channels::Column;

        let now = OffsetDateTime::now_utc();
        let active = entities::channels::ActiveModel {
            id: input.id.map(ActiveValue::Set).unwrap_or(ActiveValue::NotSet),
            name: ActiveValue::Set(input.name),
            channel_type: ActiveValue::Set(input.channel_type),
            base_url: ActiveValue::Set(input.base_url),
            key: ActiveValue::Set(input.key),
            config: ActiveValue::Set(input.config_json),
            ratio: ActiveValue::Set(input.ratio),
            weight: ActiveValue::Set(input.weight),
            priority: ActiveValue::Set(input.priority),
            status: ActiveValue::Set(input.status),
            disabled_reason: ActiveValue::Set(None),
            created_at: ActiveValue::Set(now),
            updated_at: ActiveValue::Set(now),
            ..Default::default()
        };
        let result = entities::Channels::insert(active)
            .on_conflict(
                OnConflict::column(Column::Id)
                    .update_columns([
                        Column::Name,
                        Column::ChannelType,
                        Column::BaseUrl,
                        Column::Key,
                        Column::Config,
                        Column::Ratio,
                        Column::Weight,
                        Column::Priority,
                        Column::Status,
                        Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(input.id.unwrap_or(result.last_insert_id))
    }

    pub async fn set_channel_status(
        &self,
        channel_id: i64,
        status: ChannelStatus,
        reason: Option<String>,
        at: OffsetDateTime,
    ) -> StorageResult<()> {
        let active = entities::channels::ActiveModel {
            id: ActiveValue::Set(channel_id),
            status: ActiveValue::Set(status.as_i32()),
            disabled_reason: ActiveValue::Set(reason),
            updated_at: ActiveValue::Set(at),
            ..Default::default()
        };
        entities::Channels::update(active).exec(&self.db).await?;
        Ok(())
    }

    /// Adds `delta` to the balance; `used_quota` moves the other way.
    pub async fn apply_quota_delta(&self, account_id: i64, delta: i64) -> StorageResult<()> {
        use entities::accounts::Column;

        if delta == 0 {
            return Ok(());
        }
        entities::Accounts::update_many()
            .col_expr(Column::Quota, Expr::col(Column::Quota).add(delta))
            .col_expr(Column::UsedQuota, Expr::col(Column::UsedQuota).sub(delta))
            .col_expr(Column::UpdatedAt, Expr::value(OffsetDateTime::now_utc()))
            .filter(Column::Id.eq(account_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Inserts one cost row. A duplicate `request_id` is a no-op so retried
    /// writes stay idempotent.
    pub async fn insert_cost(
        &self,
        account_id: i64,
        request_id: &str,
        quota: i64,
    ) -> StorageResult<()> {
        use entities::user_request_costs::Column;

        let active = entities::user_request_costs::ActiveModel {
            id: ActiveValue::NotSet,
            account_id: ActiveValue::Set(account_id),
            request_id: ActiveValue::Set(request_id.to_string()),
            quota: ActiveValue::Set(quota),
            created_at: ActiveValue::Set(OffsetDateTime::now_utc()),
            ..Default::default()
        };
        entities::UserRequestCosts::insert(active)
            .on_conflict(OnConflict::column(Column::RequestId).do_nothing().to_owned())
            .do_nothing()
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn list_costs(
        &self,
        account_id: i64,
    ) -> StorageResult<Vec<entities::user_request_costs::Model>> {
        use entities::user_request_costs::Column;

        Ok(entities::UserRequestCosts::find()
            .filter(Column::AccountId.eq(account_id))
            .all(&self.db)
            .await?)
    }
}
