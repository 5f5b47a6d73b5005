//! Interactive browser sign-in.
//!
//! Drives one authorization-code + PKCE round trip: open the browser, wait for
//! the loopback redirect, check the CSRF state and exchange the code.

use std::sync::{mpsc, Arc};
use std::time::Duration;

use tracing::{error, info};

use crate::auth::callback_server::{self, CallbackResult};
use crate::auth::oauth::{parse_callback_url, OAuth2Client, PkceChallenge};
use crate::auth::session::Session;
use crate::error::{DirectoryError, DirectoryResult};

/// Opens the authorization URL for the user.
pub type BrowserLauncher = Arc<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

/// The system browser.
pub fn system_browser() -> BrowserLauncher {
    Arc::new(|url: &str| open::that(url))
}

/// Browser-based sign-in against Azure AD.
pub struct InteractiveLogin {
    oauth_client: OAuth2Client,
    tenant: String,
    timeout: Duration,
    browser: BrowserLauncher,
}

impl InteractiveLogin {
    pub fn new(oauth_client: OAuth2Client, tenant: impl Into<String>, timeout: Duration) -> Self {
        Self {
            oauth_client,
            tenant: tenant.into(),
            timeout,
            browser: system_browser(),
        }
    }

    /// Replace the browser launcher.
    pub fn with_browser(mut self, browser: BrowserLauncher) -> Self {
        self.browser = browser;
        self
    }

    /// Run the sign-in flow to completion.
    pub async fn sign_in(&self) -> DirectoryResult<Session> {
        let (port, path) = callback_server::loopback_target(self.oauth_client.redirect_uri())
            .ok_or_else(|| {
                DirectoryError::Login(format!(
                    "Redirect URI {} is not a loopback address",
                    self.oauth_client.redirect_uri()
                ))
            })?;

        let pkce = PkceChallenge::new();
        let (auth_url, expected_state) = self.oauth_client.generate_auth_url(&pkce)?;

        info!("Starting interactive sign-in");

        // Dropping cancel_tx (on any early return) stops the server thread
        let (cancel_tx, cancel_rx) = mpsc::channel::<()>();
        let timeout = self.timeout;
        let server = tokio::task::spawn_blocking(move || {
            callback_server::start_callback_server(port, &path, cancel_rx, timeout)
        });

        if let Err(e) = (self.browser)(auth_url.as_str()) {
            error!("Failed to open browser: {}", e);
            let _ = cancel_tx.send(());
            let _ = server.await;
            return Err(DirectoryError::Login("Failed to open browser".to_string()));
        }

        let callback = server
            .await
            .map_err(|e| DirectoryError::Login(format!("Callback server failed: {}", e)))?;
        drop(cancel_tx);

        let url = match callback {
            CallbackResult::Success(url) => url,
            CallbackResult::Cancelled => {
                return Err(DirectoryError::Login("User cancelled authentication".to_string()))
            }
            CallbackResult::TimedOut => {
                return Err(DirectoryError::Login("OAuth callback timeout".to_string()))
            }
            CallbackResult::Error(e) => return Err(DirectoryError::Login(e)),
        };

        let (code, state) = parse_callback_url(&url)?;
        if state != expected_state {
            return Err(DirectoryError::Login(
                "State mismatch - possible CSRF attack".to_string(),
            ));
        }

        let token = self.oauth_client.exchange_code(&code, &pkce.verifier).await?;
        let session = Session::from_expires_in(token.access_token, token.expires_in, &self.tenant);

        if let Some(remaining) = session.time_until_expiry() {
            info!(
                "Signed in to {}, session valid for {} min",
                session.tenant(),
                remaining.num_minutes()
            );
        }

        Ok(session)
    }
}
