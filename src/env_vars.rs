//! Environment-variable service: the `EnvironmentVariable` entity's
//! create/update/delete surface, sitting on top of `db::env_vars` and
//! `EncryptionProvider` so plaintext never reaches the repository layer or
//! the database.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context as _;
use uuid::Uuid;

use crate::db::env_vars as db_env_vars;
use crate::db::models::EnvironmentVariable;
use crate::db::pool::with_transaction;
use crate::errors::{CoreError, CoreResult};
use crate::state::ControllerState;

pub struct EnvVarService {
    state: Arc<ControllerState>,
}

impl EnvVarService {
    pub fn new(state: Arc<ControllerState>) -> Self {
        Self { state }
    }

    /// Encrypt `plaintext` and upsert a single variable.
    pub async fn set_variable(
        &self,
        service_id: Uuid,
        environment_id: Option<Uuid>,
        key: &str,
        plaintext: &str,
        is_secret: bool,
        created_by: Option<Uuid>,
    ) -> CoreResult<EnvironmentVariable> {
        let value_encrypted = self
            .state
            .encryption
            .encrypt(plaintext)
            .await
            .map_err(|e| CoreError::fatal(format!("failed to encrypt value for key '{key}': {e}")))?;

        db_env_vars::upsert(
            &self.state.db_pool,
            service_id,
            environment_id,
            key,
            &value_encrypted,
            is_secret,
            created_by,
        )
        .await
        .map_err(|e| CoreError::from_db_error("upserting environment variable", e))
    }

    /// Upsert many variables for a service in one transaction: each value is
    /// encrypted individually as its row is written, and either every row
    /// commits or none do.
    pub async fn bulk_upsert(
        &self,
        service_id: Uuid,
        environment_id: Option<Uuid>,
        entries: Vec<(String, String, bool)>,
        created_by: Option<Uuid>,
    ) -> CoreResult<Vec<EnvironmentVariable>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let encryption = self.state.encryption.clone();
        let pool = self.state.db_pool.clone();

        with_transaction(&pool, move |tx| {
            Box::pin(async move {
                let mut rows = Vec::with_capacity(entries.len());
                for (key, plaintext, is_secret) in entries {
                    let value_encrypted = encryption
                        .encrypt(&plaintext)
                        .await
                        .with_context(|| format!("failed to encrypt value for key '{key}'"))?;
                    let row = db_env_vars::upsert(
                        &mut **tx,
                        service_id,
                        environment_id,
                        &key,
                        &value_encrypted,
                        is_secret,
                        created_by,
                    )
                    .await?;
                    rows.push(row);
                }
                Ok(rows)
            })
        })
        .await
        .map_err(|e| CoreError::from_db_error("bulk upserting environment variables", e))
    }

    /// Effective variables for a service in an environment, decrypted.
    /// Decryption failures abort the whole read rather than returning
    /// partial plaintext for the rows that did decrypt.
    pub async fn get_effective_decrypted(
        &self,
        service_id: Uuid,
        environment_id: Uuid,
    ) -> CoreResult<HashMap<String, String>> {
        let rows = db_env_vars::list_effective(&self.state.db_pool, service_id, environment_id)
            .await
            .map_err(|e| CoreError::from_db_error("listing effective environment variables", e))?;

        let mut effective = HashMap::with_capacity(rows.len());
        for row in rows {
            let plaintext = self
                .state
                .encryption
                .decrypt(&row.value_encrypted)
                .await
                .map_err(|e| {
                    CoreError::fatal(format!("failed to decrypt value for key '{}': {e}", row.key))
                })?;
            effective.insert(row.key, plaintext);
        }
        Ok(effective)
    }

    pub async fn delete_variable(
        &self,
        service_id: Uuid,
        environment_id: Option<Uuid>,
        key: &str,
    ) -> CoreResult<()> {
        db_env_vars::delete(&self.state.db_pool, service_id, environment_id, key)
            .await
            .map_err(|e| CoreError::from_db_error("deleting environment variable", e))
    }
}
