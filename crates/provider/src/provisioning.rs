//! Orchestrates account provisioning against the directory provider: keeps
//! the OAuth access token fresh, creates and licenses accounts, and mirrors
//! them into local storage. Directory-side work happens before the local
//! write so a failed step can be compensated by deleting the remote account.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use invite_shop_domain::services::SettingsCache;
use invite_shop_domain::storage::{
    EnterpriseUserStore, ProviderTokenStore, SettingsStore,
};
use invite_shop_domain::{
    generate_password, slugify_local_part, AppSettings, EnterpriseUserRecord, NewEnterpriseUser,
    NewProviderToken, ProviderTokenRecord,
};
use invite_shop_storage::SeaOrmStorage;
use rand::Rng;

use crate::error::ProviderError;
use crate::graph::{DirectoryApi, NewDirectoryAccount, SkuSummary};
use crate::oauth::TokenEndpoint;

/// Refresh this long before the stored expiry so an in-flight request never
/// races the token's actual end of life.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// How many principal-name candidates to try before giving up on a clash.
const PRINCIPAL_ATTEMPTS: u32 = 5;

/// A freshly provisioned account together with its one-time password. The
/// password exists only in this value; it is never persisted.
#[derive(Debug, Clone)]
pub struct ProvisionedAccount {
    pub user: EnterpriseUserRecord,
    pub password: String,
}

pub struct ProvisioningService {
    storage: SeaOrmStorage,
    directory: Arc<dyn DirectoryApi>,
    oauth: Arc<dyn TokenEndpoint>,
    settings_cache: Arc<SettingsCache>,
    tenant_domain: String,
}

impl ProvisioningService {
    pub fn new(
        storage: SeaOrmStorage,
        directory: Arc<dyn DirectoryApi>,
        oauth: Arc<dyn TokenEndpoint>,
        settings_cache: Arc<SettingsCache>,
        tenant_domain: String,
    ) -> Self {
        Self {
            storage,
            directory,
            oauth,
            settings_cache,
            tenant_domain,
        }
    }

    async fn settings(&self) -> Result<AppSettings, ProviderError> {
        if let Some(settings) = self.settings_cache.get() {
            return Ok(settings);
        }
        let settings = self
            .storage
            .load_settings()
            .await?
            .ok_or(ProviderError::ConfigMissing("settings row not configured"))?;
        self.settings_cache.store(settings.clone());
        Ok(settings)
    }

    /// Returns an access token valid for at least the refresh margin,
    /// refreshing and re-storing the token cell when the stored one is stale.
    pub async fn valid_access_token(&self) -> Result<String, ProviderError> {
        let stored = self
            .storage
            .current_token()
            .await?
            .ok_or(ProviderError::NoStoredToken)?;
        let deadline = Utc::now() + ChronoDuration::seconds(TOKEN_REFRESH_MARGIN_SECS);
        if stored.expires_at > deadline {
            return Ok(stored.access_token);
        }
        let refreshed = self.refresh_token_cell(stored).await?;
        Ok(refreshed.access_token)
    }

    /// Seeds the token cell from an authorization code obtained out of band
    /// (the operator's one-time admin-consent flow).
    pub async fn seed_token_from_code(
        &self,
        redirect_uri: &str,
        code: &str,
    ) -> Result<ProviderTokenRecord, ProviderError> {
        let settings = self.settings().await?;
        let granted = self
            .oauth
            .exchange_code(
                &settings.client_id,
                &settings.client_secret,
                redirect_uri,
                code,
            )
            .await?;
        let replaced = self
            .storage
            .replace_token(NewProviderToken {
                access_token: granted.access_token,
                refresh_token: granted.refresh_token,
                token_type: granted.token_type.unwrap_or_else(|| "Bearer".to_string()),
                scope: granted.scope,
                expires_at: Utc::now() + ChronoDuration::seconds(granted.expires_in),
            })
            .await?;
        Ok(replaced)
    }

    /// Unconditionally exchanges the stored refresh token for a new access
    /// token. Exposed for the admin endpoint that forces a refresh.
    pub async fn refresh_now(&self) -> Result<ProviderTokenRecord, ProviderError> {
        let stored = self
            .storage
            .current_token()
            .await?
            .ok_or(ProviderError::NoStoredToken)?;
        self.refresh_token_cell(stored).await
    }

    async fn refresh_token_cell(
        &self,
        stored: ProviderTokenRecord,
    ) -> Result<ProviderTokenRecord, ProviderError> {
        let refresh_token = stored
            .refresh_token
            .clone()
            .ok_or(ProviderError::RefreshUnavailable)?;
        let settings = self.settings().await?;
        if settings.client_id.is_empty() {
            return Err(ProviderError::ConfigMissing("client_id"));
        }
        if settings.client_secret.is_empty() {
            return Err(ProviderError::ConfigMissing("client_secret"));
        }
        let granted = self
            .oauth
            .refresh(&settings.client_id, &settings.client_secret, &refresh_token)
            .await?;
        tracing::info!(expires_in = granted.expires_in, "provider token refreshed");
        let replaced = self
            .storage
            .replace_token(NewProviderToken {
                access_token: granted.access_token,
                // The endpoint may rotate the refresh token; keep the old one
                // when it does not hand back a replacement.
                refresh_token: granted.refresh_token.or(Some(refresh_token)),
                token_type: granted.token_type.unwrap_or_else(|| "Bearer".to_string()),
                scope: granted.scope,
                expires_at: Utc::now() + ChronoDuration::seconds(granted.expires_in),
            })
            .await?;
        Ok(replaced)
    }

    /// Creates a directory account for the given display name, assigns the
    /// configured license and mirrors the account locally. Any failure after
    /// the remote create deletes the remote account again so no orphan is
    /// left behind.
    pub async fn create_account(
        &self,
        display_name: &str,
        local_part: Option<&str>,
    ) -> Result<ProvisionedAccount, ProviderError> {
        let settings = self.settings().await?;
        let token = self.valid_access_token().await?;
        // An explicit local part is taken as given; only the display-name
        // fallback goes through the slugifier.
        let base = match local_part.map(str::trim).filter(|part| !part.is_empty()) {
            Some(requested) => requested.to_string(),
            None => slugify_local_part(display_name),
        };
        let principal = self.pick_principal(&base, display_name).await?;
        let password = generate_password();

        let account = NewDirectoryAccount {
            display_name: display_name.to_string(),
            mail_nickname: principal
                .split('@')
                .next()
                .unwrap_or(&principal)
                .to_string(),
            user_principal_name: principal.clone(),
            password: password.clone(),
        };
        let provider_user_id = self.directory.create_user(&token, &account).await?;
        tracing::info!(principal = %principal, "directory account created");

        if let Some(sku_id) = settings.license_sku_id.as_deref() {
            if let Err(err) = self
                .directory
                .assign_license(&token, &provider_user_id, sku_id)
                .await
            {
                tracing::warn!(error = %err, "license assignment failed, rolling back account");
                self.compensate_delete(&token, &provider_user_id).await;
                return Err(err);
            }
        }

        let user = match self
            .storage
            .insert_user(NewEnterpriseUser {
                provider_user_id: provider_user_id.clone(),
                principal_name: principal,
                display_name: display_name.to_string(),
            })
            .await
        {
            Ok(user) => user,
            Err(err) => {
                tracing::warn!(error = %err, "local mirror write failed, rolling back account");
                self.compensate_delete(&token, &provider_user_id).await;
                return Err(err.into());
            }
        };

        Ok(ProvisionedAccount { user, password })
    }

    /// Sets a new random password on an already-provisioned account and
    /// returns it alongside the account record.
    pub async fn reset_password(
        &self,
        principal_name: &str,
    ) -> Result<ProvisionedAccount, ProviderError> {
        let user = self
            .storage
            .find_user_by_principal(principal_name)
            .await?
            .ok_or_else(|| ProviderError::UnknownAccount(principal_name.to_string()))?;
        let token = self.valid_access_token().await?;
        let password = generate_password();
        self.directory
            .reset_password(&token, &user.provider_user_id, &password)
            .await?;
        tracing::info!(principal = %user.principal_name, "password reset");
        Ok(ProvisionedAccount { user, password })
    }

    pub async fn list_skus(&self) -> Result<Vec<SkuSummary>, ProviderError> {
        let token = self.valid_access_token().await?;
        self.directory.list_skus(&token).await
    }

    /// Finds a principal name not already mirrored locally, appending random
    /// digits when the requested local part is taken.
    async fn pick_principal(
        &self,
        base: &str,
        display_name: &str,
    ) -> Result<String, ProviderError> {
        for attempt in 0..PRINCIPAL_ATTEMPTS {
            let local = if attempt == 0 {
                base.to_string()
            } else {
                format!("{base}{}", rand::thread_rng().gen_range(0..10_000))
            };
            let candidate = format!("{local}@{}", self.tenant_domain);
            if self
                .storage
                .find_user_by_principal(&candidate)
                .await?
                .is_none()
            {
                return Ok(candidate);
            }
        }
        Err(ProviderError::BadResponse(format!(
            "could not find a free principal name for `{display_name}`"
        )))
    }

    /// Best-effort removal of a remote account whose local binding did not
    /// stick (e.g. the redemption lost a single-use race). Errors are logged,
    /// never propagated.
    pub async fn rollback_account(&self, provider_user_id: &str) {
        match self.valid_access_token().await {
            Ok(token) => self.compensate_delete(&token, provider_user_id).await,
            Err(err) => {
                tracing::error!(
                    provider_user_id,
                    error = %err,
                    "rollback skipped, no usable access token"
                );
            }
        }
    }

    /// Best-effort rollback of a remote account; a failure here is logged,
    /// not propagated, since the original error is what the caller needs.
    async fn compensate_delete(&self, token: &str, provider_user_id: &str) {
        if let Err(err) = self.directory.delete_user(token, provider_user_id).await {
            tracing::error!(
                provider_user_id,
                error = %err,
                "compensating delete failed, account may be orphaned"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::Mutex;

    use crate::oauth::TokenResponse;

    #[derive(Default)]
    struct FakeDirectory {
        created: Mutex<Vec<NewDirectoryAccount>>,
        deleted: Mutex<Vec<String>>,
        licensed: Mutex<Vec<(String, String)>>,
        fail_license: bool,
        passwords: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl DirectoryApi for FakeDirectory {
        async fn create_user(
            &self,
            _token: &str,
            account: &NewDirectoryAccount,
        ) -> Result<String, ProviderError> {
            let mut created = self.created.lock().unwrap();
            created.push(account.clone());
            Ok(format!("obj-{}", created.len()))
        }

        async fn delete_user(&self, _token: &str, user_id: &str) -> Result<(), ProviderError> {
            self.deleted.lock().unwrap().push(user_id.to_string());
            Ok(())
        }

        async fn assign_license(
            &self,
            _token: &str,
            user_id: &str,
            sku_id: &str,
        ) -> Result<(), ProviderError> {
            if self.fail_license {
                return Err(ProviderError::InsufficientPrivilege(
                    "license assignment denied".into(),
                ));
            }
            self.licensed
                .lock()
                .unwrap()
                .push((user_id.to_string(), sku_id.to_string()));
            Ok(())
        }

        async fn reset_password(
            &self,
            _token: &str,
            user_id: &str,
            new_password: &str,
        ) -> Result<(), ProviderError> {
            self.passwords
                .lock()
                .unwrap()
                .push((user_id.to_string(), new_password.to_string()));
            Ok(())
        }

        async fn list_skus(&self, _token: &str) -> Result<Vec<SkuSummary>, ProviderError> {
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct FakeTokenEndpoint {
        refreshes: Mutex<u32>,
        rotate_refresh_token: bool,
    }

    #[async_trait]
    impl TokenEndpoint for FakeTokenEndpoint {
        async fn exchange_code(
            &self,
            _client_id: &str,
            _client_secret: &str,
            _redirect_uri: &str,
            _code: &str,
        ) -> Result<TokenResponse, ProviderError> {
            Ok(TokenResponse {
                access_token: "seeded-access".into(),
                refresh_token: Some("seeded-refresh".into()),
                token_type: Some("Bearer".into()),
                scope: None,
                expires_in: 3600,
            })
        }

        async fn refresh(
            &self,
            _client_id: &str,
            _client_secret: &str,
            _refresh_token: &str,
        ) -> Result<TokenResponse, ProviderError> {
            *self.refreshes.lock().unwrap() += 1;
            Ok(TokenResponse {
                access_token: "fresh-access".into(),
                refresh_token: if self.rotate_refresh_token {
                    Some("rotated-refresh".into())
                } else {
                    None
                },
                token_type: Some("Bearer".into()),
                scope: None,
                expires_in: 3600,
            })
        }
    }

    async fn storage() -> SeaOrmStorage {
        SeaOrmStorage::connect("sqlite::memory:").await.unwrap()
    }

    async fn seed_settings(storage: &SeaOrmStorage, sku: Option<&str>) {
        storage
            .save_settings(&AppSettings {
                client_id: "cid".into(),
                client_secret: "secret".into(),
                license_sku_id: sku.map(str::to_string),
                gateway_merchant_id: "1001".into(),
                gateway_key: "gkey".into(),
                gateway_url: "https://pay.example.com".into(),
                invite_price: Decimal::new(1000, 2),
            })
            .await
            .unwrap();
    }

    async fn seed_token(storage: &SeaOrmStorage, expires_in_secs: i64) {
        storage
            .replace_token(NewProviderToken {
                access_token: "stored-access".into(),
                refresh_token: Some("stored-refresh".into()),
                token_type: "Bearer".into(),
                scope: None,
                expires_at: Utc::now() + ChronoDuration::seconds(expires_in_secs),
            })
            .await
            .unwrap();
    }

    fn service(
        storage: SeaOrmStorage,
        directory: Arc<FakeDirectory>,
        oauth: Arc<FakeTokenEndpoint>,
    ) -> ProvisioningService {
        ProvisioningService::new(
            storage,
            directory,
            oauth,
            Arc::new(SettingsCache::default()),
            "corp.example.com".into(),
        )
    }

    #[tokio::test]
    async fn fresh_token_is_used_without_refreshing() {
        let storage = storage().await;
        seed_settings(&storage, None).await;
        seed_token(&storage, 3600).await;
        let oauth = Arc::new(FakeTokenEndpoint::default());
        let svc = service(storage, Arc::new(FakeDirectory::default()), oauth.clone());

        let token = svc.valid_access_token().await.unwrap();
        assert_eq!(token, "stored-access");
        assert_eq!(*oauth.refreshes.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_token_is_refreshed_and_old_refresh_token_retained() {
        let storage = storage().await;
        seed_settings(&storage, None).await;
        // Inside the refresh margin.
        seed_token(&storage, 30).await;
        let oauth = Arc::new(FakeTokenEndpoint::default());
        let svc = service(
            storage.clone(),
            Arc::new(FakeDirectory::default()),
            oauth.clone(),
        );

        let token = svc.valid_access_token().await.unwrap();
        assert_eq!(token, "fresh-access");
        assert_eq!(*oauth.refreshes.lock().unwrap(), 1);
        let cell = storage.current_token().await.unwrap().unwrap();
        assert_eq!(cell.refresh_token.as_deref(), Some("stored-refresh"));
    }

    #[tokio::test]
    async fn rotated_refresh_token_replaces_the_stored_one() {
        let storage = storage().await;
        seed_settings(&storage, None).await;
        seed_token(&storage, 0).await;
        let oauth = Arc::new(FakeTokenEndpoint {
            rotate_refresh_token: true,
            ..Default::default()
        });
        let svc = service(storage.clone(), Arc::new(FakeDirectory::default()), oauth);

        svc.refresh_now().await.unwrap();
        let cell = storage.current_token().await.unwrap().unwrap();
        assert_eq!(cell.refresh_token.as_deref(), Some("rotated-refresh"));
    }

    #[tokio::test]
    async fn seeding_from_an_authorization_code_fills_the_cell() {
        let storage = storage().await;
        seed_settings(&storage, None).await;
        let svc = service(
            storage.clone(),
            Arc::new(FakeDirectory::default()),
            Arc::new(FakeTokenEndpoint::default()),
        );

        svc.seed_token_from_code("https://shop.example.com/callback", "auth-code")
            .await
            .unwrap();
        let cell = storage.current_token().await.unwrap().unwrap();
        assert_eq!(cell.access_token, "seeded-access");
        assert_eq!(cell.refresh_token.as_deref(), Some("seeded-refresh"));
    }

    #[tokio::test]
    async fn missing_token_cell_is_reported() {
        let storage = storage().await;
        seed_settings(&storage, None).await;
        let svc = service(
            storage,
            Arc::new(FakeDirectory::default()),
            Arc::new(FakeTokenEndpoint::default()),
        );
        assert!(matches!(
            svc.valid_access_token().await,
            Err(ProviderError::NoStoredToken)
        ));
    }

    #[tokio::test]
    async fn create_account_provisions_licenses_and_mirrors() {
        let storage = storage().await;
        seed_settings(&storage, Some("sku-123")).await;
        seed_token(&storage, 3600).await;
        let directory = Arc::new(FakeDirectory::default());
        let svc = service(
            storage.clone(),
            directory.clone(),
            Arc::new(FakeTokenEndpoint::default()),
        );

        let account = svc.create_account("Ada Lovelace", None).await.unwrap();
        assert_eq!(account.user.principal_name, "ada-lovelace@corp.example.com");
        assert_eq!(account.password.len(), 20);
        assert_eq!(directory.licensed.lock().unwrap().len(), 1);
        let mirrored = storage
            .find_user_by_principal("ada-lovelace@corp.example.com")
            .await
            .unwrap();
        assert!(mirrored.is_some());
    }

    #[tokio::test]
    async fn explicit_local_part_is_used_verbatim() {
        let storage = storage().await;
        seed_settings(&storage, None).await;
        seed_token(&storage, 3600).await;
        let directory = Arc::new(FakeDirectory::default());
        let svc = service(
            storage,
            directory,
            Arc::new(FakeTokenEndpoint::default()),
        );

        let account = svc
            .create_account("Ada Lovelace", Some(" team.Ada "))
            .await
            .unwrap();
        assert_eq!(account.user.principal_name, "team.Ada@corp.example.com");

        let fallback = svc.create_account("Grace Hopper", Some("   ")).await.unwrap();
        assert_eq!(
            fallback.user.principal_name,
            "grace-hopper@corp.example.com"
        );
    }

    #[tokio::test]
    async fn license_failure_rolls_back_the_remote_account() {
        let storage = storage().await;
        seed_settings(&storage, Some("sku-123")).await;
        seed_token(&storage, 3600).await;
        let directory = Arc::new(FakeDirectory {
            fail_license: true,
            ..Default::default()
        });
        let svc = service(
            storage.clone(),
            directory.clone(),
            Arc::new(FakeTokenEndpoint::default()),
        );

        let err = svc.create_account("Ada Lovelace", None).await.unwrap_err();
        assert!(matches!(err, ProviderError::InsufficientPrivilege(_)));
        assert_eq!(directory.deleted.lock().unwrap().as_slice(), ["obj-1"]);
        let mirrored = storage
            .find_user_by_principal("ada-lovelace@corp.example.com")
            .await
            .unwrap();
        assert!(mirrored.is_none());
    }

    #[tokio::test]
    async fn principal_collisions_get_distinct_names() {
        let storage = storage().await;
        seed_settings(&storage, None).await;
        seed_token(&storage, 3600).await;
        let directory = Arc::new(FakeDirectory::default());
        let svc = service(
            storage.clone(),
            directory.clone(),
            Arc::new(FakeTokenEndpoint::default()),
        );

        let first = svc.create_account("Ada Lovelace", None).await.unwrap();
        let second = svc.create_account("Ada Lovelace", None).await.unwrap();
        assert_ne!(first.user.principal_name, second.user.principal_name);
        assert!(second
            .user
            .principal_name
            .starts_with("ada-lovelace"));
    }

    #[tokio::test]
    async fn reset_password_targets_the_mirrored_account() {
        let storage = storage().await;
        seed_settings(&storage, None).await;
        seed_token(&storage, 3600).await;
        let directory = Arc::new(FakeDirectory::default());
        let svc = service(
            storage.clone(),
            directory.clone(),
            Arc::new(FakeTokenEndpoint::default()),
        );

        let created = svc.create_account("Grace Hopper", None).await.unwrap();
        let reset = svc
            .reset_password(&created.user.principal_name)
            .await
            .unwrap();
        assert_ne!(reset.password, created.password);
        let calls = directory.passwords.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, created.user.provider_user_id);
    }
}
