use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "credential_model_status")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub credential_id: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub model_name: String,
    pub status: String,
    pub failing_since: Option<OffsetDateTime>,
    pub last_checked: Option<OffsetDateTime>,
    #[sea_orm(indexed)]
    pub next_check_time: OffsetDateTime,
    pub status_code: Option<i32>,
    pub response_time_ms: Option<i64>,
    pub error_message: Option<String>,
    #[sea_orm(belongs_to, from = "credential_id", to = "id", on_delete = "Cascade")]
    pub credential: HasOne<super::credentials::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
