use sea_orm::entity::prelude::*;

#[sea_orm::model]
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "credentials")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique_key = "provider_value")]
    pub provider_id: i64,
    #[sea_orm(unique_key = "provider_value")]
    pub value: String,
    #[sea_orm(belongs_to, from = "provider_id", to = "id", on_delete = "Cascade")]
    pub provider: HasOne<super::providers::Entity>,
    #[sea_orm(has_many)]
    pub model_status: HasMany<super::credential_model_status::Entity>,
}

impl ActiveModelBehavior for ActiveModel {}
