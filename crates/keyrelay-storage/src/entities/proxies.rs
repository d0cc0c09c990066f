use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "proxies")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "proxy_address")]
    pub address: String,
    #[sea_orm(has_many)]
    pub status: HasMany<super::provider_proxy_status::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
