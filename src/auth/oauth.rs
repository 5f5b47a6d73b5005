//! OAuth2 client with PKCE support for Azure AD authentication.

use crate::config::Config;
use crate::error::DirectoryError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use url::Url;

/// Azure AD sign-in authority.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// PKCE code verifier and challenge pair.
#[derive(Debug)]
pub struct PkceChallenge {
    /// The code verifier (kept locally, sent in token exchange).
    pub verifier: String,
    /// The code challenge (SHA256 hash of verifier, sent in auth request).
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a new PKCE challenge pair.
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let verifier_bytes: Vec<u8> = (0..32).map(|_| rng.gen()).collect();
        let verifier = URL_SAFE_NO_PAD.encode(&verifier_bytes);

        // challenge = BASE64URL(SHA256(verifier))
        let mut hasher = Sha256::new();
        hasher.update(verifier.as_bytes());
        let hash = hasher.finalize();
        let challenge = URL_SAFE_NO_PAD.encode(hash);

        Self {
            verifier,
            challenge,
        }
    }
}

impl Default for PkceChallenge {
    fn default() -> Self {
        Self::new()
    }
}

/// OAuth2 client for Azure AD authentication.
pub struct OAuth2Client {
    client_id: String,
    tenant: String,
    redirect_uri: String,
    scopes: Vec<String>,
    authority: String,
    http_client: reqwest::Client,
}

impl OAuth2Client {
    /// Create a new OAuth2 client from configuration.
    pub fn new(config: &Config) -> Result<Self, DirectoryError> {
        Self::with_authority(config, DEFAULT_AUTHORITY)
    }

    /// Create a client against a non-default authority (sovereign clouds, tests).
    pub fn with_authority(config: &Config, authority: &str) -> Result<Self, DirectoryError> {
        let http_client = reqwest::Client::builder()
            .timeout(config.api.timeout())
            .connect_timeout(config.api.connect_timeout())
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| DirectoryError::Login(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client_id: config.oauth.client_id.clone(),
            tenant: config.oauth.tenant.clone(),
            redirect_uri: config.oauth.redirect_uri.clone(),
            scopes: config.oauth.scopes.scopes.clone(),
            authority: authority.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{}/oauth2/v2.0/{}", self.authority, self.tenant, name)
    }

    /// Generate the authorization URL for browser-based sign-in.
    ///
    /// Returns the URL and a CSRF state token that must be verified in the callback.
    pub fn generate_auth_url(&self, pkce: &PkceChallenge) -> Result<(Url, String), DirectoryError> {
        let mut rng = rand::thread_rng();
        let state_bytes: Vec<u8> = (0..16).map(|_| rng.gen()).collect();
        let state = URL_SAFE_NO_PAD.encode(&state_bytes);

        let mut url = Url::parse(&self.endpoint("authorize"))
            .map_err(|e| DirectoryError::Login(format!("Invalid auth endpoint: {}", e)))?;

        url.query_pairs_mut()
            .append_pair("client_id", &self.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("response_mode", "query")
            .append_pair("scope", &self.scopes.join(" "))
            .append_pair("state", &state)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", "S256");

        Ok((url, state))
    }

    /// Exchange an authorization code for tokens.
    pub async fn exchange_code(
        &self,
        code: &str,
        pkce_verifier: &str,
    ) -> Result<TokenResponse, DirectoryError> {
        let scope = self.scopes.join(" ");
        let params = [
            ("client_id", self.client_id.as_str()),
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code_verifier", pkce_verifier),
            ("scope", scope.as_str()),
        ];

        let response = self
            .http_client
            .post(self.endpoint("token"))
            .form(&params)
            .send()
            .await
            .map_err(DirectoryError::from_reqwest)?;

        if !response.status().is_success() {
            let status = response.status();
            // Details go to the log only
            let error_body = response.text().await.unwrap_or_default();
            tracing::error!("Token exchange failed: HTTP {} - {}", status, error_body);
            return Err(DirectoryError::Login(format!(
                "Token exchange failed: HTTP {}",
                status.as_u16()
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| DirectoryError::Login(format!("Invalid token response: {}", e)))
    }
}

/// Token response from Azure AD.
#[derive(Debug, serde::Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: String,
}

/// Parse OAuth callback URL to extract code and state.
pub fn parse_callback_url(url_string: &str) -> Result<(String, String), DirectoryError> {
    let url = Url::parse(url_string)
        .map_err(|_| DirectoryError::Login("Invalid callback URL".to_string()))?;

    let params: HashMap<_, _> = url.query_pairs().collect();

    if let Some(error) = params.get("error") {
        let description = params
            .get("error_description")
            .map(|s| s.to_string())
            .unwrap_or_else(|| error.to_string());
        return Err(DirectoryError::Login(description));
    }

    let code = params
        .get("code")
        .ok_or_else(|| DirectoryError::Login("Invalid authorization code".to_string()))?
        .to_string();

    let state = params
        .get("state")
        .ok_or_else(|| {
            DirectoryError::Login("State validation failed (possible CSRF attack)".to_string())
        })?
        .to_string();

    Ok((code, state))
}
