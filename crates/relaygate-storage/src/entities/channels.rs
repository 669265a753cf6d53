use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "channels")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    pub channel_type: String,
    pub base_url: Option<String>,
    pub key: String,
    /// `api_version`, `model_mapping` and `models`.
    pub config: Json,
    pub ratio: f64,
    pub weight: i32,
    pub priority: i32,
    pub status: i32,
    pub disabled_reason: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl ActiveModelBehavior for ActiveModel {}
