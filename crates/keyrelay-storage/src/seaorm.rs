use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use keyrelay_common::{ErrorReason, Status, ALL_MODELS_MARKER};
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, ConnectionTrait, Database, DatabaseBackend,
    DatabaseConnection, EntityTrait, QueryFilter, Schema, Set,
};
use time::OffsetDateTime;

use crate::entities;
use crate::error::StorageResult;
use crate::storage::Storage;
use crate::types::{KeyStatusCount, PoolRow, ProbeCandidate, ProxyProbeCandidate, StatusUpdate};

#[derive(Clone)]
pub struct SeaOrmStorage {
    db: DatabaseConnection,
}

impl SeaOrmStorage {
    pub async fn connect(dsn: &str) -> StorageResult<Self> {
        let db = Database::connect(dsn).await?;
        if db.get_database_backend() == DatabaseBackend::Sqlite {
            db.execute_unprepared("PRAGMA foreign_keys = ON").await?;
        }
        Ok(Self { db })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}

#[async_trait]
impl Storage for SeaOrmStorage {
    async fn sync(&self) -> StorageResult<()> {
        Schema::new(self.db.get_database_backend())
            .builder()
            .register(entities::Providers)
            .register(entities::Credentials)
            .register(entities::CredentialModelStatus)
            .register(entities::Proxies)
            .register(entities::ProviderProxyStatus)
            .sync(&self.db)
            .await?;
        Ok(())
    }

    async fn wait_for_schema_ready(&self, timeout: Duration) -> StorageResult<()> {
        crate::db::wait_for_schema_ready(&self.db, timeout).await?;
        Ok(())
    }

    async fn sync_providers(&self, names: &[String]) -> StorageResult<HashMap<String, i64>> {
        let existing = entities::Providers::find().all(&self.db).await?;
        let mut map: HashMap<String, i64> =
            existing.into_iter().map(|row| (row.name, row.id)).collect();

        for name in names {
            if map.contains_key(name) {
                continue;
            }
            let inserted = entities::providers::ActiveModel {
                id: ActiveValue::NotSet,
                name: Set(name.clone()),
                ..Default::default()
            }
            .insert(&self.db)
            .await?;
            map.insert(name.clone(), inserted.id);
        }

        Ok(map)
    }

    async fn provider_id_map(&self) -> StorageResult<HashMap<String, i64>> {
        let rows = entities::Providers::find().all(&self.db).await?;
        Ok(rows.into_iter().map(|row| (row.name, row.id)).collect())
    }

    async fn sync_credentials(&self, provider_id: i64, values: &HashSet<String>) -> StorageResult<Vec<i64>> {
        use entities::credentials::Column;

        let existing = entities::Credentials::find()
            .filter(Column::ProviderId.eq(provider_id))
            .all(&self.db)
            .await?;
        let mut existing_by_value: HashMap<String, i64> =
            existing.into_iter().map(|row| (row.value, row.id)).collect();

        for value in values {
            if existing_by_value.contains_key(value) {
                continue;
            }
            let inserted = entities::credentials::ActiveModel {
                id: ActiveValue::NotSet,
                provider_id: Set(provider_id),
                value: Set(value.clone()),
                ..Default::default()
            }
            .insert(&self.db)
            .await?;
            existing_by_value.insert(value.clone(), inserted.id);
        }

        Ok(existing_by_value.into_values().collect())
    }

    async fn reconcile_credential_model_rows(
        &self,
        _provider_id: i64,
        credential_ids: &[i64],
        models: &[String],
        shared_key_status: bool,
    ) -> StorageResult<()> {
        use entities::credential_model_status::Column;

        let wanted_models: Vec<String> =
            if shared_key_status { vec![ALL_MODELS_MARKER.to_string()] } else { models.to_vec() };

        for &credential_id in credential_ids {
            let existing = entities::CredentialModelStatus::find()
                .filter(Column::CredentialId.eq(credential_id))
                .all(&self.db)
                .await?;
            let existing_models: HashSet<String> =
                existing.iter().map(|row| row.model_name.clone()).collect();

            let now = OffsetDateTime::now_utc();
            for model in &wanted_models {
                if existing_models.contains(model) {
                    continue;
                }
                entities::credential_model_status::ActiveModel {
                    credential_id: Set(credential_id),
                    model_name: Set(model.clone()),
                    status: Set(Status::Untested.as_str().to_string()),
                    failing_since: Set(None),
                    last_checked: Set(None),
                    next_check_time: Set(now),
                    status_code: Set(None),
                    response_time_ms: Set(None),
                    error_message: Set(None),
                }
                .insert(&self.db)
                .await?;
            }

            for row in existing {
                if !wanted_models.contains(&row.model_name) {
                    entities::CredentialModelStatus::delete_by_id((row.credential_id, row.model_name))
                        .exec(&self.db)
                        .await?;
                }
            }
        }

        Ok(())
    }

    async fn sync_proxies(&self, provider_id: i64, addresses: &HashSet<String>) -> StorageResult<Vec<i64>> {
        let existing = entities::Proxies::find().all(&self.db).await?;
        let mut existing_by_address: HashMap<String, i64> =
            existing.into_iter().map(|row| (row.address, row.id)).collect();

        for address in addresses {
            if existing_by_address.contains_key(address) {
                continue;
            }
            let inserted = entities::proxies::ActiveModel {
                id: ActiveValue::NotSet,
                address: Set(address.clone()),
            }
            .insert(&self.db)
            .await?;
            existing_by_address.insert(address.clone(), inserted.id);
        }

        let ids: Vec<i64> = existing_by_address.into_values().collect();
        for &proxy_id in &ids {
            self.ensure_proxy_status_row(proxy_id, provider_id).await?;
        }
        Ok(ids)
    }

    async fn reconcile_provider_proxy_status(&self, provider_id: i64, proxy_ids: &[i64]) -> StorageResult<()> {
        use entities::provider_proxy_status::Column;

        let existing = entities::ProviderProxyStatus::find()
            .filter(Column::ProviderId.eq(provider_id))
            .all(&self.db)
            .await?;

        for row in existing {
            if !proxy_ids.contains(&row.proxy_id) {
                entities::ProviderProxyStatus::delete_by_id((row.proxy_id, row.provider_id))
                    .exec(&self.db)
                    .await?;
            }
        }

        for &proxy_id in proxy_ids {
            self.ensure_proxy_status_row(proxy_id, provider_id).await?;
        }

        Ok(())
    }

    async fn load_valid_pool_rows(&self) -> StorageResult<Vec<PoolRow>> {
        use entities::credential_model_status::Column as StatusColumn;

        let rows = entities::CredentialModelStatus::find()
            .filter(StatusColumn::Status.eq(Status::Valid.as_str()))
            .all(&self.db)
            .await?;

        let credential_ids: Vec<i64> = rows.iter().map(|row| row.credential_id).collect();
        let credentials = entities::Credentials::find()
            .filter(entities::credentials::Column::Id.is_in(credential_ids))
            .all(&self.db)
            .await?;
        let providers = entities::Providers::find().all(&self.db).await?;
        let provider_name_by_id: HashMap<i64, String> =
            providers.into_iter().map(|p| (p.id, p.name)).collect();
        let credential_by_id: HashMap<i64, entities::credentials::Model> =
            credentials.into_iter().map(|c| (c.id, c)).collect();

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let Some(credential) = credential_by_id.get(&row.credential_id) else { continue };
            let Some(instance) = provider_name_by_id.get(&credential.provider_id) else { continue };
            out.push(PoolRow {
                instance: instance.clone(),
                model: row.model_name,
                credential_id: row.credential_id,
                credential_value: credential.value.clone(),
            });
        }
        Ok(out)
    }

    async fn get_keys_to_check(&self, enabled_providers: &[String]) -> StorageResult<Vec<ProbeCandidate>> {
        use entities::credential_model_status::Column as StatusColumn;

        let now = OffsetDateTime::now_utc();
        let due = entities::CredentialModelStatus::find()
            .filter(StatusColumn::NextCheckTime.lte(now))
            .all(&self.db)
            .await?;

        let credentials = entities::Credentials::find().all(&self.db).await?;
        let credential_by_id: HashMap<i64, entities::credentials::Model> =
            credentials.into_iter().map(|c| (c.id, c)).collect();
        let providers = entities::Providers::find().all(&self.db).await?;
        let provider_by_id: HashMap<i64, String> = providers.into_iter().map(|p| (p.id, p.name)).collect();
        let enabled: HashSet<&str> = enabled_providers.iter().map(String::as_str).collect();

        let mut out = Vec::new();
        for row in due {
            let Some(credential) = credential_by_id.get(&row.credential_id) else { continue };
            let Some(provider_name) = provider_by_id.get(&credential.provider_id) else { continue };
            if !enabled.contains(provider_name.as_str()) {
                continue;
            }
            out.push(ProbeCandidate {
                credential_id: row.credential_id,
                provider_name: provider_name.clone(),
                model_name: row.model_name,
                key_value: credential.value.clone(),
                failing_since: row.failing_since,
                scheduled_next_check: row.next_check_time,
            });
        }
        Ok(out)
    }

    async fn get_proxies_to_check(&self, enabled_providers: &[String]) -> StorageResult<Vec<ProxyProbeCandidate>> {
        use entities::provider_proxy_status::Column as StatusColumn;

        let now = OffsetDateTime::now_utc();
        let due = entities::ProviderProxyStatus::find()
            .filter(StatusColumn::NextCheckTime.lte(now))
            .all(&self.db)
            .await?;

        let proxies = entities::Proxies::find().all(&self.db).await?;
        let proxy_by_id: HashMap<i64, entities::proxies::Model> =
            proxies.into_iter().map(|p| (p.id, p)).collect();
        let providers = entities::Providers::find().all(&self.db).await?;
        let provider_by_id: HashMap<i64, String> = providers.into_iter().map(|p| (p.id, p.name)).collect();
        let enabled: HashSet<&str> = enabled_providers.iter().map(String::as_str).collect();

        let mut out = Vec::new();
        for row in due {
            let Some(proxy) = proxy_by_id.get(&row.proxy_id) else { continue };
            let Some(provider_name) = provider_by_id.get(&row.provider_id) else { continue };
            if !enabled.contains(provider_name.as_str()) {
                continue;
            }
            out.push(ProxyProbeCandidate {
                proxy_id: row.proxy_id,
                provider_id: row.provider_id,
                provider_name: provider_name.clone(),
                address: proxy.address.clone(),
                failing_since: row.failing_since,
            });
        }
        Ok(out)
    }

    async fn apply_status_update(&self, update: StatusUpdate) -> StorageResult<()> {
        use entities::credential_model_status::Column;

        let mut query = entities::CredentialModelStatus::find()
            .filter(Column::CredentialId.eq(update.credential_id));
        if let Some(model_name) = &update.model_name {
            query = query.filter(Column::ModelName.eq(model_name.clone()));
        }
        let rows = query.all(&self.db).await?;
        let now = OffsetDateTime::now_utc();

        for row in rows {
            let failing_since = if update.ok { None } else { Some(row.failing_since.unwrap_or(now)) };
            let mut active: entities::credential_model_status::ActiveModel = row.into();
            active.status = Set(update.status.as_str().to_string());
            active.last_checked = Set(Some(now));
            active.next_check_time = Set(update.next_check_time);
            active.status_code = Set(update.status_code.map(i32::from));
            active.response_time_ms = Set(update.response_time_ms.map(|ms| ms as i64));
            active.error_message = Set(update.error_message.clone());
            active.failing_since = Set(failing_since);
            active.update(&self.db).await?;
        }

        Ok(())
    }

    async fn apply_proxy_status_update(
        &self,
        proxy_id: i64,
        provider_id: i64,
        ok: bool,
        reason: Option<ErrorReason>,
        error_message: Option<String>,
        next_check_time: OffsetDateTime,
    ) -> StorageResult<()> {
        use entities::provider_proxy_status::Column;

        let row = entities::ProviderProxyStatus::find()
            .filter(Column::ProxyId.eq(proxy_id))
            .filter(Column::ProviderId.eq(provider_id))
            .one(&self.db)
            .await?;
        let Some(row) = row else { return Ok(()) };

        let status = if ok { Status::Valid } else { reason.map(Status::from).unwrap_or(Status::Unknown) };
        let mut active: entities::provider_proxy_status::ActiveModel = row.into();
        active.status = Set(status.as_str().to_string());
        active.last_checked = Set(Some(OffsetDateTime::now_utc()));
        active.next_check_time = Set(next_check_time);
        active.error_message = Set(error_message);
        active.update(&self.db).await?;
        Ok(())
    }

    async fn report_request_failure(
        &self,
        credential_id: i64,
        model_name: Option<&str>,
        reason: ErrorReason,
    ) -> StorageResult<()> {
        // Near-future placeholder: the probe recomputes a real next-check
        // time from the health policy on its next pass. This only needs
        // to pull the credential out of rotation promptly.
        let placeholder = OffsetDateTime::now_utc() + time::Duration::minutes(1);
        self.apply_status_update(StatusUpdate::from_check(
            credential_id,
            model_name.map(str::to_string),
            false,
            Some(reason),
            None,
            None,
            None,
            placeholder,
        ))
        .await
    }

    async fn key_status_counts(&self) -> StorageResult<Vec<KeyStatusCount>> {
        let rows = entities::CredentialModelStatus::find().all(&self.db).await?;
        let credentials = entities::Credentials::find().all(&self.db).await?;
        let credential_by_id: HashMap<i64, entities::credentials::Model> =
            credentials.into_iter().map(|c| (c.id, c)).collect();
        let providers = entities::Providers::find().all(&self.db).await?;
        let provider_by_id: HashMap<i64, String> = providers.into_iter().map(|p| (p.id, p.name)).collect();

        let mut counts: HashMap<(String, String, String), i64> = HashMap::new();
        for row in rows {
            let Some(credential) = credential_by_id.get(&row.credential_id) else { continue };
            let Some(provider_name) = provider_by_id.get(&credential.provider_id) else { continue };
            *counts
                .entry((provider_name.clone(), row.model_name.clone(), row.status.clone()))
                .or_insert(0) += 1;
        }

        Ok(counts
            .into_iter()
            .map(|((provider, model, status), count)| KeyStatusCount { provider, model, status, count })
            .collect())
    }

    async fn vacuum(&self) -> StorageResult<()> {
        match self.db.get_database_backend() {
            DatabaseBackend::Sqlite | DatabaseBackend::Postgres => {
                self.db.execute_unprepared("VACUUM").await?;
            }
            DatabaseBackend::MySql => {
                // MySQL has no bare VACUUM; OPTIMIZE TABLE is per-table and
                // out of scope for a generic maintenance sweep.
            }
        }
        Ok(())
    }
}

impl SeaOrmStorage {
    async fn ensure_proxy_status_row(&self, proxy_id: i64, provider_id: i64) -> StorageResult<()> {
        use entities::provider_proxy_status::Column;

        let existing = entities::ProviderProxyStatus::find()
            .filter(Column::ProxyId.eq(proxy_id))
            .filter(Column::ProviderId.eq(provider_id))
            .one(&self.db)
            .await?;
        if existing.is_some() {
            return Ok(());
        }

        entities::provider_proxy_status::ActiveModel {
            proxy_id: Set(proxy_id),
            provider_id: Set(provider_id),
            status: Set(Status::Untested.as_str().to_string()),
            last_checked: Set(None),
            next_check_time: Set(OffsetDateTime::now_utc()),
            error_message: Set(None),
        }
        .insert(&self.db)
        .await?;
        Ok(())
    }
}
