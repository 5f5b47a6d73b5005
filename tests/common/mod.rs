//! In-memory directory used by the manager tests.
//!
//! Records every call, can be told to fail or hold selected calls, and
//! simulates a slow interactive sign-in.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use o365_manager::auth::Session;
use o365_manager::config::SessionConfig;
use o365_manager::{
    Application, DirectoryError, DirectoryResult, DirectoryServiceClient,
    DirectoryServiceManager, OAuth2PermissionGrant, Office365Resource, ServicePrincipal,
};

pub const EXCHANGE_SP: &str = "exchange-sp";
pub const SHAREPOINT_SP: &str = "sharepoint-sp";
pub const AAD_SP: &str = "aad-sp";

/// A call that reached the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Login,
    ListApplications,
    GetApplication(String),
    CreateApplication(String),
    UpdateApplication(String),
    DeleteApplication(String),
    ListServicePrincipals,
    CreateServicePrincipal(String),
    DeleteServicePrincipal(String),
    ListGrants,
    CreateGrant { resource_id: String, scope: String },
    UpdateGrant(String),
    DeleteGrant(String),
}

impl Call {
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Call::Login
                | Call::ListApplications
                | Call::GetApplication(_)
                | Call::ListServicePrincipals
                | Call::ListGrants
        )
    }
}

type FailureRule = (Box<dyn Fn(&Call) -> bool + Send + Sync>, DirectoryError);
type DelayRule = (Box<dyn Fn(&Call) -> bool + Send + Sync>, Duration);

#[derive(Default)]
struct FakeState {
    applications: Vec<Application>,
    principals: Vec<ServicePrincipal>,
    grants: Vec<OAuth2PermissionGrant>,
    calls: Vec<Call>,
    failures: Vec<FailureRule>,
    delays: Vec<DelayRule>,
    next_id: u64,
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }
}

/// Mock directory behaviour configuration.
#[derive(Debug, Clone)]
pub struct LoginBehaviour {
    pub delay: Duration,
    pub session_lifetime_secs: u64,
    pub error: Option<DirectoryError>,
    pub panic: bool,
}

impl Default for LoginBehaviour {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(10),
            session_lifetime_secs: 3600,
            error: None,
            panic: false,
        }
    }
}

#[derive(Default)]
pub struct FakeDirectory {
    state: Mutex<FakeState>,
    login: Mutex<LoginBehaviour>,
}

impl FakeDirectory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// A tenant with the Exchange, SharePoint and Azure AD resource principals.
    pub fn with_o365_resources() -> Arc<Self> {
        let fake = Self::new();
        fake.add_resource(Office365Resource::ExchangeOnline, EXCHANGE_SP);
        fake.add_resource(Office365Resource::SharePointOnline, SHAREPOINT_SP);
        fake.add_resource(Office365Resource::AzureActiveDirectory, AAD_SP);
        fake
    }

    pub fn set_login(&self, behaviour: LoginBehaviour) {
        *self.login.lock().unwrap() = behaviour;
    }

    pub fn add_resource(&self, resource: Office365Resource, object_id: &str) {
        self.state.lock().unwrap().principals.push(ServicePrincipal {
            object_id: Some(object_id.to_string()),
            display_name: Some(resource.display_name().to_string()),
            ..ServicePrincipal::for_app(resource.app_id())
        });
    }

    /// A registered application with the given appId.
    pub fn add_application(&self, name: &str, app_id: &str) -> Application {
        let mut state = self.state.lock().unwrap();
        let application = Application {
            object_id: Some(state.next_id("app-obj")),
            app_id: Some(app_id.to_string()),
            ..Application::new(name).with_reply_url("https://contoso.com/auth")
        };
        state.applications.push(application.clone());
        application
    }

    /// A service principal for `app_id`; returns its object id.
    pub fn add_principal(&self, app_id: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let object_id = state.next_id("sp");
        state.principals.push(ServicePrincipal {
            object_id: Some(object_id.clone()),
            ..ServicePrincipal::for_app(app_id)
        });
        object_id
    }

    pub fn add_grant(&self, client_id: &str, resource_id: &str, scope: &str) -> String {
        let mut state = self.state.lock().unwrap();
        let object_id = state.next_id("grant");
        state.grants.push(OAuth2PermissionGrant {
            object_id: Some(object_id.clone()),
            scope: scope.to_string(),
            ..OAuth2PermissionGrant::all_principals(client_id, resource_id, &[] as &[&str])
        });
        object_id
    }

    /// Fail every call matching `rule` with `error`.
    pub fn fail_when(
        &self,
        rule: impl Fn(&Call) -> bool + Send + Sync + 'static,
        error: DirectoryError,
    ) {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((Box::new(rule), error));
    }

    /// Hold every call matching `rule` for `delay` after it is recorded.
    pub fn delay_when(&self, rule: impl Fn(&Call) -> bool + Send + Sync + 'static, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .delays
            .push((Box::new(rule), delay));
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn mutations(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutation).collect()
    }

    pub fn login_count(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Login).count()
    }

    pub fn reset_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn grants(&self) -> Vec<OAuth2PermissionGrant> {
        self.state.lock().unwrap().grants.clone()
    }

    pub fn principals(&self) -> Vec<ServicePrincipal> {
        self.state.lock().unwrap().principals.clone()
    }

    /// Scopes currently granted on `resource_id`, one string per grant.
    pub fn grant_scopes(&self, resource_id: &str) -> Vec<String> {
        self.grants()
            .into_iter()
            .filter(|g| g.resource_id == resource_id)
            .map(|g| g.scope)
            .collect()
    }

    /// Log `call`, wait out any matching delay, then apply failure rules.
    async fn record(&self, call: Call) -> DirectoryResult<std::sync::MutexGuard<'_, FakeState>> {
        let (failure, delay) = {
            let mut state = self.state.lock().unwrap();
            let failure = state
                .failures
                .iter()
                .find(|(rule, _)| rule(&call))
                .map(|(_, error)| error.clone());
            let delay = state
                .delays
                .iter()
                .find(|(rule, _)| rule(&call))
                .map(|(_, delay)| *delay);
            state.calls.push(call);
            (failure, delay)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        match failure {
            Some(error) => Err(error),
            None => Ok(self.state.lock().unwrap()),
        }
    }
}

#[async_trait]
impl DirectoryServiceClient for FakeDirectory {
    async fn interactive_login(&self) -> DirectoryResult<Session> {
        drop(self.record(Call::Login).await?);
        let behaviour = self.login.lock().unwrap().clone();

        tokio::time::sleep(behaviour.delay).await;
        if behaviour.panic {
            panic!("browser closed unexpectedly");
        }

        match behaviour.error {
            Some(error) => Err(error),
            None => Ok(Session::from_expires_in(
                "fake-token",
                behaviour.session_lifetime_secs,
                "contoso",
            )),
        }
    }

    async fn list_applications(&self, _session: &Session) -> DirectoryResult<Vec<Application>> {
        Ok(self.record(Call::ListApplications).await?.applications.clone())
    }

    async fn get_application(
        &self,
        _session: &Session,
        object_id: &str,
    ) -> DirectoryResult<Application> {
        let state = self.record(Call::GetApplication(object_id.to_string())).await?;
        state
            .applications
            .iter()
            .find(|a| a.object_id.as_deref() == Some(object_id))
            .cloned()
            .ok_or_else(|| DirectoryError::NotFound(object_id.to_string()))
    }

    async fn create_application(
        &self,
        _session: &Session,
        application: &Application,
    ) -> DirectoryResult<Application> {
        let mut state = self.record(Call::CreateApplication(application.display_name.clone())).await?;
        let created = Application {
            object_id: Some(state.next_id("app-obj")),
            app_id: Some(state.next_id("app-id")),
            ..application.clone()
        };
        state.applications.push(created.clone());
        Ok(created)
    }

    async fn update_application(
        &self,
        _session: &Session,
        application: &Application,
    ) -> DirectoryResult<Application> {
        let object_id = application.object_id.clone().unwrap_or_default();
        let mut state = self.record(Call::UpdateApplication(object_id.clone())).await?;
        let stored = state
            .applications
            .iter_mut()
            .find(|a| a.object_id.as_deref() == Some(object_id.as_str()))
            .ok_or_else(|| DirectoryError::NotFound(object_id.clone()))?;
        *stored = application.clone();
        Ok(application.clone())
    }

    async fn delete_application(&self, _session: &Session, object_id: &str) -> DirectoryResult<()> {
        let mut state = self.record(Call::DeleteApplication(object_id.to_string())).await?;
        state
            .applications
            .retain(|a| a.object_id.as_deref() != Some(object_id));
        Ok(())
    }

    async fn list_service_principals(
        &self,
        _session: &Session,
    ) -> DirectoryResult<Vec<ServicePrincipal>> {
        Ok(self.record(Call::ListServicePrincipals).await?.principals.clone())
    }

    async fn create_service_principal(
        &self,
        _session: &Session,
        service_principal: &ServicePrincipal,
    ) -> DirectoryResult<ServicePrincipal> {
        let mut state =
            self.record(Call::CreateServicePrincipal(service_principal.app_id.clone())).await?;
        let created = ServicePrincipal {
            object_id: Some(state.next_id("sp")),
            ..service_principal.clone()
        };
        state.principals.push(created.clone());
        Ok(created)
    }

    async fn delete_service_principal(
        &self,
        _session: &Session,
        object_id: &str,
    ) -> DirectoryResult<()> {
        let mut state = self.record(Call::DeleteServicePrincipal(object_id.to_string())).await?;
        state
            .principals
            .retain(|sp| sp.object_id.as_deref() != Some(object_id));
        Ok(())
    }

    async fn list_permission_grants(
        &self,
        _session: &Session,
    ) -> DirectoryResult<Vec<OAuth2PermissionGrant>> {
        Ok(self.record(Call::ListGrants).await?.grants.clone())
    }

    async fn create_permission_grant(
        &self,
        _session: &Session,
        grant: &OAuth2PermissionGrant,
    ) -> DirectoryResult<OAuth2PermissionGrant> {
        let mut state = self
            .record(Call::CreateGrant {
                resource_id: grant.resource_id.clone(),
                scope: grant.scope.clone(),
            })
            .await?;
        let created = OAuth2PermissionGrant {
            object_id: Some(state.next_id("grant")),
            ..grant.clone()
        };
        state.grants.push(created.clone());
        Ok(created)
    }

    async fn update_permission_grant(
        &self,
        _session: &Session,
        grant: &OAuth2PermissionGrant,
    ) -> DirectoryResult<OAuth2PermissionGrant> {
        let object_id = grant.object_id.clone().unwrap_or_default();
        let mut state = self.record(Call::UpdateGrant(object_id.clone())).await?;
        let stored = state
            .grants
            .iter_mut()
            .find(|g| g.object_id.as_deref() == Some(object_id.as_str()))
            .ok_or_else(|| DirectoryError::NotFound(object_id.clone()))?;
        stored.scope = grant.scope.clone();
        Ok(stored.clone())
    }

    async fn delete_permission_grant(
        &self,
        _session: &Session,
        object_id: &str,
    ) -> DirectoryResult<()> {
        let mut state = self.record(Call::DeleteGrant(object_id.to_string())).await?;
        let before = state.grants.len();
        state
            .grants
            .retain(|g| g.object_id.as_deref() != Some(object_id));
        if state.grants.len() == before {
            return Err(DirectoryError::NotFound(object_id.to_string()));
        }
        Ok(())
    }
}

pub fn manager(fake: &Arc<FakeDirectory>) -> DirectoryServiceManager {
    DirectoryServiceManager::new(fake.clone(), &SessionConfig::default())
}

/// A manager that has completed sign-in, with the call log reset.
pub async fn signed_in(fake: &Arc<FakeDirectory>) -> DirectoryServiceManager {
    let manager = manager(fake);
    manager.authenticate().await.unwrap();
    fake.reset_calls();
    manager
}
