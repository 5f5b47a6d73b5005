//! Azure AD Graph API client for applications, service principals and
//! permission grants.

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};
use uuid::Uuid;

use super::models::{Application, OAuth2PermissionGrant, ServicePrincipal};
use super::DirectoryServiceClient;
use crate::auth::oauth::OAuth2Client;
use crate::auth::{InteractiveLogin, Session};
use crate::config::Config;
use crate::error::{DirectoryError, DirectoryResult};

const APPLICATIONS: &str = "applications";
const SERVICE_PRINCIPALS: &str = "servicePrincipals";
const PERMISSION_GRANTS: &str = "oauth2PermissionGrants";

/// Azure AD Graph directory client.
pub struct GraphDirectoryClient {
    http_client: Client,
    /// `{graph_base_url}/{tenant}`
    tenant_url: String,
    api_version: String,
    login: InteractiveLogin,
}

impl GraphDirectoryClient {
    /// Create a new Graph client from configuration.
    pub fn new(config: &Config) -> DirectoryResult<Self> {
        let oauth_client = OAuth2Client::new(config)?;
        let login = InteractiveLogin::new(
            oauth_client,
            config.directory_tenant(),
            config.session.login_timeout(),
        );

        Self::with_login(config, login)
    }

    /// Create a client that signs in through the given flow.
    pub fn with_login(config: &Config, login: InteractiveLogin) -> DirectoryResult<Self> {
        let http_client = Client::builder()
            .timeout(config.api.timeout())
            .connect_timeout(config.api.connect_timeout())
            .build()
            .map_err(|e| DirectoryError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            tenant_url: format!(
                "{}/{}",
                config.api.graph_base_url.trim_end_matches('/'),
                config.directory_tenant()
            ),
            api_version: config.api.api_version.clone(),
            login,
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}?api-version={}",
            self.tenant_url, path, self.api_version
        )
    }

    fn entity_url(&self, collection: &str, object_id: &str) -> String {
        self.url(&format!(
            "{}/{}",
            collection,
            urlencoding::encode(object_id)
        ))
    }

    /// Resolve an `odata.nextLink`, which is usually relative to the tenant.
    fn next_page_url(&self, next_link: &str) -> String {
        let link = if next_link.starts_with("http://") || next_link.starts_with("https://") {
            next_link.to_string()
        } else {
            format!("{}/{}", self.tenant_url, next_link.trim_start_matches('/'))
        };

        if link.contains("api-version=") {
            link
        } else {
            let separator = if link.contains('?') { '&' } else { '?' };
            format!("{}{}api-version={}", link, separator, self.api_version)
        }
    }

    fn request(&self, method: Method, url: &str, session: &Session) -> RequestBuilder {
        self.http_client
            .request(method, url)
            .bearer_auth(session.access_token())
            .header("client-request-id", Uuid::new_v4().to_string())
    }

    /// Send a request and turn non-success statuses into errors.
    async fn send(&self, request: RequestBuilder) -> DirectoryResult<Response> {
        let response = request.send().await.map_err(DirectoryError::from_reqwest)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let (code, message) = parse_error_body(&body)
            .unwrap_or_else(|| (None, format!("HTTP {}", status.as_u16())));

        match status.as_u16() {
            401 => Err(DirectoryError::Unauthorized),
            403 => Err(DirectoryError::Forbidden(message)),
            404 => Err(DirectoryError::NotFound(message)),
            other => {
                error!("Directory request failed: HTTP {} - {}", other, body);
                Err(DirectoryError::Rejected {
                    status: other,
                    code,
                    message,
                })
            }
        }
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> DirectoryResult<T> {
        response
            .json()
            .await
            .map_err(|e| DirectoryError::InvalidResponse(e.to_string()))
    }

    /// GET a collection, following `odata.nextLink` until exhausted.
    async fn list<T: DeserializeOwned>(
        &self,
        session: &Session,
        collection: &str,
    ) -> DirectoryResult<Vec<T>> {
        let mut url = self.url(collection);
        let mut items = Vec::new();

        loop {
            debug!("Fetching {}", url);
            let response = self.send(self.request(Method::GET, &url, session)).await?;
            let page: ODataList<T> = Self::read_json(response).await?;
            items.extend(page.value);

            match page.next_link {
                Some(next) => url = self.next_page_url(&next),
                None => break,
            }
        }

        debug!("Fetched {} {}", items.len(), collection);
        Ok(items)
    }

    async fn create<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        session: &Session,
        collection: &str,
        body: &B,
    ) -> DirectoryResult<T> {
        let request = self
            .request(Method::POST, &self.url(collection), session)
            .json(body);
        let response = self.send(request).await?;
        Self::read_json(response).await
    }

    /// PATCH answers 204 without a body.
    async fn patch<B: Serialize + ?Sized>(
        &self,
        session: &Session,
        collection: &str,
        object_id: &str,
        body: &B,
    ) -> DirectoryResult<()> {
        let request = self
            .request(Method::PATCH, &self.entity_url(collection, object_id), session)
            .json(body);
        self.send(request).await?;
        Ok(())
    }

    async fn delete(
        &self,
        session: &Session,
        collection: &str,
        object_id: &str,
    ) -> DirectoryResult<()> {
        let request = self.request(
            Method::DELETE,
            &self.entity_url(collection, object_id),
            session,
        );
        self.send(request).await?;
        Ok(())
    }
}

fn require_object_id<'a>(object_id: &'a Option<String>, what: &str) -> DirectoryResult<&'a str> {
    object_id.as_deref().ok_or_else(|| DirectoryError::Rejected {
        status: 400,
        code: None,
        message: format!("{} has no objectId", what),
    })
}

#[async_trait]
impl DirectoryServiceClient for GraphDirectoryClient {
    async fn interactive_login(&self) -> DirectoryResult<Session> {
        self.login.sign_in().await
    }

    async fn list_applications(&self, session: &Session) -> DirectoryResult<Vec<Application>> {
        self.list(session, APPLICATIONS).await
    }

    async fn get_application(
        &self,
        session: &Session,
        object_id: &str,
    ) -> DirectoryResult<Application> {
        let url = self.entity_url(APPLICATIONS, object_id);
        let response = self.send(self.request(Method::GET, &url, session)).await?;
        Self::read_json(response).await
    }

    async fn create_application(
        &self,
        session: &Session,
        application: &Application,
    ) -> DirectoryResult<Application> {
        let created: Application = self.create(session, APPLICATIONS, application).await?;
        info!(
            "Created application {} ({})",
            created.display_name,
            created.app_id.as_deref().unwrap_or("no appId")
        );
        Ok(created)
    }

    async fn update_application(
        &self,
        session: &Session,
        application: &Application,
    ) -> DirectoryResult<Application> {
        let object_id = require_object_id(&application.object_id, "application")?;
        self.patch(
            session,
            APPLICATIONS,
            object_id,
            &ApplicationPatch::from(application),
        )
        .await?;
        Ok(application.clone())
    }

    async fn delete_application(&self, session: &Session, object_id: &str) -> DirectoryResult<()> {
        self.delete(session, APPLICATIONS, object_id).await
    }

    async fn list_service_principals(
        &self,
        session: &Session,
    ) -> DirectoryResult<Vec<ServicePrincipal>> {
        self.list(session, SERVICE_PRINCIPALS).await
    }

    async fn create_service_principal(
        &self,
        session: &Session,
        service_principal: &ServicePrincipal,
    ) -> DirectoryResult<ServicePrincipal> {
        self.create(session, SERVICE_PRINCIPALS, service_principal)
            .await
    }

    async fn delete_service_principal(
        &self,
        session: &Session,
        object_id: &str,
    ) -> DirectoryResult<()> {
        self.delete(session, SERVICE_PRINCIPALS, object_id).await
    }

    async fn list_permission_grants(
        &self,
        session: &Session,
    ) -> DirectoryResult<Vec<OAuth2PermissionGrant>> {
        self.list(session, PERMISSION_GRANTS).await
    }

    async fn create_permission_grant(
        &self,
        session: &Session,
        grant: &OAuth2PermissionGrant,
    ) -> DirectoryResult<OAuth2PermissionGrant> {
        self.create(session, PERMISSION_GRANTS, grant).await
    }

    async fn update_permission_grant(
        &self,
        session: &Session,
        grant: &OAuth2PermissionGrant,
    ) -> DirectoryResult<OAuth2PermissionGrant> {
        let object_id = require_object_id(&grant.object_id, "permission grant")?;
        self.patch(
            session,
            PERMISSION_GRANTS,
            object_id,
            &serde_json::json!({ "scope": grant.scope }),
        )
        .await?;
        Ok(grant.clone())
    }

    async fn delete_permission_grant(
        &self,
        session: &Session,
        object_id: &str,
    ) -> DirectoryResult<()> {
        self.delete(session, PERMISSION_GRANTS, object_id).await
    }
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct ODataList<T> {
    value: Vec<T>,
    #[serde(rename = "odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ODataErrorResponse {
    #[serde(rename = "odata.error")]
    error: ODataError,
}

#[derive(Debug, Deserialize)]
struct ODataError {
    code: Option<String>,
    message: Option<ODataMessage>,
}

#[derive(Debug, Deserialize)]
struct ODataMessage {
    value: String,
}

fn parse_error_body(body: &str) -> Option<(Option<String>, String)> {
    let parsed: ODataErrorResponse = serde_json::from_str(body).ok()?;
    let message = parsed.error.message.map(|m| m.value)?;
    Some((parsed.error.code, message))
}

/// Mutable application fields; server-assigned ids are read-only.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationPatch<'a> {
    display_name: &'a str,
    reply_urls: &'a [String],
    homepage: Option<&'a str>,
    available_to_other_tenants: bool,
    public_client: bool,
}

impl<'a> From<&'a Application> for ApplicationPatch<'a> {
    fn from(app: &'a Application) -> Self {
        Self {
            display_name: &app.display_name,
            reply_urls: &app.reply_urls,
            homepage: app.homepage.as_deref(),
            available_to_other_tenants: app.available_to_other_tenants,
            public_client: app.public_client,
        }
    }
}
