//! Credential and session lifecycle management: password authentication with
//! brute-force lockout, JWT access tokens, rotating refresh tokens, and
//! password-reset tokens.
//!
//! The crate is a library; callers embed [`SessionManager`] behind whatever
//! transport they expose and map [`AuthError`] variants to their own status
//! codes. Persistence goes through the [`store::CredentialStore`] trait, with
//! Postgres and in-memory implementations provided.

pub mod config;
pub mod error;
pub mod lockout;
pub mod models;
pub mod passwords;
pub mod session;
pub mod store;
pub mod tokens;
pub mod validate;

pub use config::AuthConfig;
pub use error::{AuthError, AuthResult, StoreError};
pub use lockout::{LockoutPolicy, LockoutState};
pub use models::{
    Account, AccountSummary, AuthenticatedSession, NewAccount, RefreshTokenRecord,
    ResetTokenIssued, RevocationReason, Role,
};
pub use passwords::PasswordService;
pub use session::SessionManager;
pub use store::{CredentialStore, MemoryCredentialStore, PgCredentialStore};
pub use tokens::{AccessTokenClaims, SignedAccessToken, TokenService};

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use std::sync::{Arc, Once};

    use chrono::{Duration, Utc};
    use env_logger::Env;
    use uuid::Uuid;

    use crate::config::AuthConfig;
    use crate::error::AuthResult;
    use crate::session::SessionManager;
    use crate::store::MemoryCredentialStore;

    pub use database::{TestDatabase, TestDatabaseError};

    static LOGGER: Once = Once::new();

    /// Install an `env_logger` subscriber once per test binary.
    pub fn init_logger() {
        LOGGER.call_once(|| {
            env_logger::Builder::from_env(Env::default().default_filter_or("info"))
                .is_test(true)
                .init();
        });
    }

    /// Deterministic configuration for tests; reads nothing from the
    /// environment.
    pub fn test_config() -> AuthConfig {
        AuthConfig {
            issuer: "gatehouse-tests".to_string(),
            audience: "gatehouse-test-clients".to_string(),
            jwt_secret: "test-secret-0123456789-0123456789".to_string(),
            access_token_ttl_secs: 3600,
            refresh_token_ttl_secs: 7 * 24 * 3600,
            reset_token_ttl_secs: 24 * 3600,
            max_failed_logins: 5,
            lockout_duration_secs: 900,
        }
    }

    /// A `SessionManager` over a fresh in-memory store, returned together
    /// with the store handle so tests can reach the fixture helpers.
    pub fn memory_manager() -> AuthResult<(SessionManager, Arc<MemoryCredentialStore>)> {
        memory_manager_with(test_config())
    }

    pub fn memory_manager_with(
        config: AuthConfig,
    ) -> AuthResult<(SessionManager, Arc<MemoryCredentialStore>)> {
        init_logger();
        let store = Arc::new(MemoryCredentialStore::new());
        let manager = SessionManager::new(&config, store.clone())?;
        Ok((manager, store))
    }

    /// Time-travel helpers over the in-memory store. Tests cannot wait out
    /// real lockout and token lifetimes, so these rewind the stored stamps
    /// instead.
    pub struct TestFixtures<'a> {
        store: &'a MemoryCredentialStore,
    }

    impl<'a> TestFixtures<'a> {
        pub fn new(store: &'a MemoryCredentialStore) -> Self {
            Self { store }
        }

        /// Move an account's lockout stamp into the past.
        pub fn expire_lockout(&self, account_id: Uuid) {
            self.store
                .rewind_lockout(account_id, Utc::now() - Duration::seconds(1));
        }

        /// Move an account's reset-token expiry into the past.
        pub fn expire_reset_token(&self, account_id: Uuid) {
            self.store
                .rewind_reset_expiry(account_id, Utc::now() - Duration::seconds(1));
        }

        /// Move a refresh token's expiry into the past.
        pub fn expire_refresh_token(&self, token: &str) {
            self.store
                .rewind_token_expiry(token, Utc::now() - Duration::seconds(1));
        }

        /// Deactivate an account, as the external administrative layer would.
        pub fn deactivate(&self, account_id: Uuid) {
            self.store.set_active(account_id, false);
        }

        /// Current failed-login counter, for asserting lockout bookkeeping.
        pub fn failed_logins(&self, account_id: Uuid) -> Option<i32> {
            self.store.failed_logins(account_id)
        }
    }

    pub mod database {
        use sqlx::PgPool;
        use sqlx::postgres::PgPoolOptions;
        use testcontainers_modules::postgres::Postgres;
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;

        use crate::store::postgres::run_migrations;

        /// Container-backed store tests opt in through this variable.
        pub const OPT_IN_ENV: &str = "GATEHOUSE_TEST_PG";

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("GATEHOUSE_TEST_PG not set")]
            Disabled,
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral migrated Postgres for store integration tests.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            container: Option<ContainerAsync<Postgres>>,
        }

        impl TestDatabase {
            /// Provision a disposable database, or report `Disabled` when the
            /// opt-in variable is absent so callers can skip cleanly.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                if std::env::var(OPT_IN_ENV).is_err() {
                    return Err(TestDatabaseError::Disabled);
                }
                Self::new().await
            }

            /// Launch a disposable Postgres container and migrate it.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let container = Postgres::default().start().await?;

                let host = container.get_host().await?;
                let port = container.get_host_port_ipv4(5432).await?;
                let url = format!("postgres://postgres:postgres@{host}:{port}/postgres");

                let pool = PgPoolOptions::new().max_connections(5).connect(&url).await?;

                run_migrations(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    container: Some(container),
                })
            }

            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            /// Convenience method returning a clone of the pooled connection
            /// handle.
            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Close pool connections and stop the container.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }
                if let Some(container) = self.container.take() {
                    drop(container);
                }
                Ok(())
            }
        }
    }
}
