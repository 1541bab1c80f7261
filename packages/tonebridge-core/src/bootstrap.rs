//! Application bootstrap and dependency wiring.
//!
//! The composition root: validates configuration, performs the bounded
//! backend login, and wires the services the API layer consumes.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::api::AppState;
use crate::backend::{Credentials, MusicBackend};
use crate::constants::LOGIN_TIMEOUT_SECS;
use crate::error::{TonebridgeError, TonebridgeResult};
use crate::session::SessionManager;
use crate::state::Config;

/// Container for all bootstrapped services.
#[derive(Clone)]
pub struct BootstrappedServices {
    /// Catalog backend handle, logged in and ready for playback.
    pub backend: Arc<dyn MusicBackend>,
    /// Single-stream session manager.
    pub session: Arc<SessionManager>,
    /// Application configuration.
    pub config: Arc<RwLock<Config>>,
}

impl BootstrappedServices {
    /// Builds the API state from the wired services.
    pub fn app_state(&self) -> AppState {
        AppState::new(
            Arc::clone(&self.backend),
            Arc::clone(&self.session),
            Arc::clone(&self.config),
        )
    }
}

/// Bootstraps all application services with their dependencies.
///
/// Logs in to the backend with a bounded wait; a handshake that does not
/// confirm within [`LOGIN_TIMEOUT_SECS`] is fatal.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or login fails.
pub async fn bootstrap_services(
    backend: Arc<dyn MusicBackend>,
    credentials: &Credentials,
    config: Config,
) -> TonebridgeResult<BootstrappedServices> {
    config
        .validate()
        .map_err(TonebridgeError::Internal)?;

    log::debug!("[Bootstrap] Logging in to backend as {}", credentials.username);
    match tokio::time::timeout(
        Duration::from_secs(LOGIN_TIMEOUT_SECS),
        backend.login(credentials),
    )
    .await
    {
        Ok(Ok(())) => log::debug!("[Bootstrap] Logged in to backend"),
        Ok(Err(e)) => return Err(TonebridgeError::Login(e.to_string())),
        Err(_) => {
            return Err(TonebridgeError::Login(format!(
                "no login confirmation after {} seconds",
                LOGIN_TIMEOUT_SECS
            )))
        }
    }

    let session = Arc::new(SessionManager::new(config.receipt_retention_secs));

    Ok(BootstrappedServices {
        backend,
        session,
        config: Arc::new(RwLock::new(config)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockBackend;
    use std::io::Write;

    fn test_credentials() -> Credentials {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(
            br#"{"username":"u","password":"p","appkey":"k","cache_dir":"/tmp/cache"}"#,
        )
        .expect("write");
        Credentials::load(file.path()).expect("load")
    }

    #[tokio::test]
    async fn bootstrap_wires_services() {
        let backend = Arc::new(MockBackend::new());
        let services = bootstrap_services(backend, &test_credentials(), Config::default())
            .await
            .expect("bootstrap");
        assert!(!services.session.is_streaming());
    }

    #[tokio::test]
    async fn bootstrap_rejects_invalid_config() {
        let backend = Arc::new(MockBackend::new());
        let config = Config {
            encoder_block_size: 0,
            ..Config::default()
        };
        let result = bootstrap_services(backend, &test_credentials(), config).await;
        assert!(matches!(result, Err(TonebridgeError::Internal(_))));
    }

    #[tokio::test]
    async fn bootstrap_surfaces_login_failure() {
        // MockBackend rejects empty usernames.
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(
            br#"{"username":"","password":"p","appkey":"k","cache_dir":"/tmp/cache"}"#,
        )
        .expect("write");
        let credentials = Credentials::load(file.path()).expect("load");

        let backend = Arc::new(MockBackend::new());
        let result = bootstrap_services(backend, &credentials, Config::default()).await;
        assert!(matches!(result, Err(TonebridgeError::Login(_))));
    }
}
