//! Wiring of storage, transport, and session context.

use client_auth::{SessionContext, SessionTransport};
use client_config_and_utils::{Config, Paths};
use client_storage::{create_storage, CredentialStore, JarCookieMirror};
use reqwest::cookie::Jar;
use reqwest::Client;
use std::sync::Arc;
use tracing::info;

/// Everything a command needs.
pub struct App {
    pub paths: Paths,
    pub session: SessionContext,
}

impl App {
    /// Open the file-backed credential store and build the session context.
    pub fn init(paths: Paths, config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let api_url = config.api_base_url()?;

        let jar = Arc::new(Jar::default());
        let cookies = Arc::new(JarCookieMirror::new(jar.clone(), api_url.clone()));
        let storage = create_storage(&paths.storage_file())?;
        let credentials = Arc::new(CredentialStore::new(
            storage,
            cookies,
            config.auth_cookie_max_age_secs,
        ));

        let http_client = Client::builder()
            .timeout(config.request_timeout())
            .cookie_provider(jar)
            .build()?;
        let transport = SessionTransport::with_http_client(http_client, api_url.as_str(), credentials);

        info!(api = %transport.base_url(), "Session client ready");
        Ok(Self {
            paths,
            session: SessionContext::create(transport),
        })
    }

    pub fn shutdown(self) {
        self.session.dispose();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use client_auth::SessionPhase;

    #[tokio::test]
    async fn test_init_with_empty_base_dir_is_anonymous() {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base_dir(dir.path().to_path_buf());
        paths.ensure_dirs().unwrap();

        let app = App::init(paths, Config::new()).unwrap();
        assert!(!app.session.is_authenticated());
        assert_eq!(app.session.hydrate().await, SessionPhase::Anonymous);
        app.shutdown();
    }
}
