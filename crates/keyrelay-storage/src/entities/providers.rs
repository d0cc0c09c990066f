use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "providers")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "provider_name")]
    pub name: String,
    #[sea_orm(has_many)]
    pub credentials: HasMany<super::credentials::Entity>,
    #[sea_orm(has_many)]
    pub proxy_status: HasMany<super::provider_proxy_status::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
