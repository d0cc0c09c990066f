use sea_orm::entity::prelude::*;
use time::OffsetDateTime;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "provider_proxy_status")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub proxy_id: i64,
    #[sea_orm(primary_key, auto_increment = false)]
    pub provider_id: i64,
    pub status: String,
    pub last_checked: Option<OffsetDateTime>,
    #[sea_orm(indexed)]
    pub next_check_time: OffsetDateTime,
    pub error_message: Option<String>,
    #[sea_orm(belongs_to, from = "proxy_id", to = "id", on_delete = "Cascade")]
    pub proxy: HasOne<super::proxies::Entity>,
    #[sea_orm(belongs_to, from = "provider_id", to = "id", on_delete = "Cascade")]
    pub provider: HasOne<super::providers::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
