//! Directory service manager.
//!
//! [`DirectoryServiceManager`] owns the signed-in session and is the single
//! entry point for directory operations. Every remote call is refused with
//! [`ManagerError::AuthenticationRequired`] while signed out, before anything
//! reaches the client.

pub mod associations;
pub mod session_state;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::join_all;
use futures::FutureExt;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::config::SessionConfig;
use crate::directory::{Application, DirectoryServiceClient, OAuth2PermissionGrant, ServicePrincipal};
use crate::error::{DirectoryError, DirectoryResult, ManagerError, ManagerResult};
use crate::office365::{
    CurrentPermissions, GrantChange, Office365Resource, ServicePermissionEntry,
};

pub use associations::{ProjectAssociations, ProjectId};
pub use session_state::AuthState;
use session_state::{ActiveSession, Begin, SessionState};

/// Grants and principals relevant to one application's Office 365 permissions.
struct PermissionSnapshot {
    /// Object ids of the application's own service principals.
    client_ids: Vec<String>,
    /// First tenant principal of each Office 365 resource.
    resource_ids: BTreeMap<Office365Resource, String>,
    current: CurrentPermissions,
}

/// Coordinates authentication and directory operations.
///
/// Cloning is cheap; clones share the session and the project associations.
#[derive(Clone)]
pub struct DirectoryServiceManager {
    client: Arc<dyn DirectoryServiceClient>,
    session: Arc<SessionState>,
    associations: Arc<ProjectAssociations>,
}

impl DirectoryServiceManager {
    pub fn new(client: Arc<dyn DirectoryServiceClient>, config: &SessionConfig) -> Self {
        Self {
            client,
            session: Arc::new(SessionState::new(config.expiry_skew())),
            associations: Arc::new(ProjectAssociations::new()),
        }
    }

    // ---- Authentication ----

    /// Sign in, unless a valid session already exists.
    ///
    /// Concurrent callers share one interactive sign-in and all receive its
    /// outcome. The sign-in runs on its own task, so it completes even if
    /// every caller stops waiting.
    pub async fn authenticate(&self) -> ManagerResult<()> {
        let outcome = match self.session.begin() {
            Begin::Ready => return Ok(()),
            Begin::Wait(outcome) => outcome,
            Begin::Start { epoch, outcome } => {
                info!("Starting sign-in");
                let client = Arc::clone(&self.client);
                let session = Arc::clone(&self.session);

                tokio::spawn(async move {
                    let login = AssertUnwindSafe(client.interactive_login()).catch_unwind();
                    let result = match login.await {
                        Ok(result) => result,
                        Err(_) => Err(DirectoryError::Login("Sign-in task panicked".to_string())),
                    };
                    if result.is_ok() {
                        info!("Signed in");
                    }
                    session.finish(epoch, result);
                });

                outcome
            }
        };

        outcome.await.unwrap_or_else(|_| {
            Err(ManagerError::AuthenticationFailed(
                "sign-in ended without a result".to_string(),
            ))
        })
    }

    /// True while a session exists and has not expired.
    pub fn authenticated(&self) -> bool {
        self.session.state() == AuthState::SignedIn
    }

    pub fn auth_state(&self) -> AuthState {
        self.session.state()
    }

    /// Sign out and forget every project association.
    pub fn clear_authentication(&self) {
        self.session.clear_with(|| self.associations.clear());
        info!("Signed out");
    }

    fn require_session(&self) -> ManagerResult<ActiveSession> {
        self.session.active().ok_or_else(|| {
            debug!("Refusing directory call while signed out");
            ManagerError::AuthenticationRequired
        })
    }

    /// Fails once `active` is no longer the signed-in session.
    ///
    /// Checked before every write of a compound operation.
    fn ensure_current(&self, active: &ActiveSession) -> ManagerResult<()> {
        if self.session.still_current(active) {
            Ok(())
        } else {
            warn!("Session ended during a directory update, stopping");
            Err(ManagerError::AuthenticationRequired)
        }
    }

    /// Map a client result; a rejected token signs the session out.
    fn remote<T>(&self, active: &ActiveSession, result: DirectoryResult<T>) -> ManagerResult<T> {
        result.map_err(|e| {
            if e == DirectoryError::Unauthorized && self.session.invalidate(active) {
                warn!("Directory service rejected the session token, signed out");
            }
            ManagerError::from(e)
        })
    }

    // ---- Reads ----

    pub async fn get_application_list(&self) -> ManagerResult<Vec<Application>> {
        let active = self.require_session()?;
        let result = self.client.list_applications(&active.session).await;
        self.remote(&active, result)
    }

    pub async fn get_application_by_object_id(&self, object_id: &str) -> ManagerResult<Application> {
        let active = self.require_session()?;
        let result = self.client.get_application(&active.session, object_id).await;
        self.remote(&active, result)
    }

    pub async fn get_service_principals(&self) -> ManagerResult<Vec<ServicePrincipal>> {
        let active = self.require_session()?;
        let result = self.client.list_service_principals(&active.session).await;
        self.remote(&active, result)
    }

    pub async fn get_permission_grants(&self) -> ManagerResult<Vec<OAuth2PermissionGrant>> {
        let active = self.require_session()?;
        let result = self.client.list_permission_grants(&active.session).await;
        self.remote(&active, result)
    }

    /// Service principals belonging to `application`.
    pub async fn get_service_principals_for_app(
        &self,
        application: &Application,
    ) -> ManagerResult<Vec<ServicePrincipal>> {
        let principals = self.get_service_principals().await?;

        Ok(match application.app_id.as_deref() {
            Some(app_id) => principals
                .into_iter()
                .filter(|sp| sp.app_id.eq_ignore_ascii_case(app_id))
                .collect(),
            None => Vec::new(),
        })
    }

    /// Tenant service principals of the Office 365 resources.
    pub async fn get_service_principals_for_o365(&self) -> ManagerResult<Vec<ServicePrincipal>> {
        let principals = self.get_service_principals().await?;

        Ok(principals
            .into_iter()
            .filter(|sp| Office365Resource::from_app_id(&sp.app_id).is_some())
            .collect())
    }

    /// Office 365 resource principals that `application` holds grants to.
    pub async fn get_o365_service_principals_for_app(
        &self,
        application: &Application,
    ) -> ManagerResult<Vec<ServicePrincipal>> {
        let active = self.require_session()?;
        let Some(app_id) = application.app_id.as_deref() else {
            return Ok(Vec::new());
        };

        let fetched = futures::try_join!(
            self.client.list_service_principals(&active.session),
            self.client.list_permission_grants(&active.session),
        );
        let (principals, grants) = self.remote(&active, fetched)?;

        let client_ids: HashSet<&str> = principals
            .iter()
            .filter(|sp| sp.app_id.eq_ignore_ascii_case(app_id))
            .filter_map(|sp| sp.object_id.as_deref())
            .collect();
        let granted: HashSet<&str> = grants
            .iter()
            .filter(|g| client_ids.contains(g.client_id.as_str()))
            .map(|g| g.resource_id.as_str())
            .collect();

        Ok(principals
            .iter()
            .filter(|sp| Office365Resource::from_app_id(&sp.app_id).is_some())
            .filter(|sp| {
                sp.object_id
                    .as_deref()
                    .is_some_and(|id| granted.contains(id))
            })
            .cloned()
            .collect())
    }

    // ---- Registration ----

    /// Register a new application.
    ///
    /// Returns the application as stored by the directory, with its
    /// assigned `object_id` and `app_id`.
    pub async fn register_application(&self, application: Application) -> ManagerResult<Application> {
        validate_registration(&application)?;
        let active = self.require_session()?;

        info!("Registering application {}", application.display_name);
        let result = self.client.create_application(&active.session, &application).await;
        let registered = self.remote(&active, result).inspect_err(|e| {
            error!("Failed to register {}: {}", application.display_name, e);
        })?;

        info!(
            "Registered {} (appId {})",
            registered.display_name,
            registered.app_id.as_deref().unwrap_or("unknown")
        );
        Ok(registered)
    }

    /// Replace the stored application with `application`.
    pub async fn update_application(&self, application: Application) -> ManagerResult<Application> {
        let object_id = application.object_id.as_deref().ok_or_else(|| {
            ManagerError::Validation("application has no object id".to_string())
        })?;
        validate_registration(&application)?;
        let active = self.require_session()?;

        info!("Updating application {}", object_id);
        let result = self.client.update_application(&active.session, &application).await;
        self.remote(&active, result)
    }

    /// Create the given service principals one after another.
    ///
    /// Stops at the first failure, or before the next write once the
    /// session has ended. Principals created before it stay created and the
    /// error is reported as `PartiallyApplied`.
    pub async fn add_service_principals(
        &self,
        service_principals: Vec<ServicePrincipal>,
    ) -> ManagerResult<Vec<ServicePrincipal>> {
        let active = self.require_session()?;
        let mut created = Vec::with_capacity(service_principals.len());

        for sp in &service_principals {
            let result = match self.ensure_current(&active) {
                Ok(()) => {
                    let result = self.client.create_service_principal(&active.session, sp).await;
                    self.remote(&active, result)
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(principal) => {
                    info!("Created service principal for {}", principal.app_id);
                    created.push(principal);
                }
                Err(e) => {
                    error!(
                        "Creating service principal for {} failed after {} of {}: {}",
                        sp.app_id,
                        created.len(),
                        service_principals.len(),
                        e
                    );
                    return Err(ManagerError::after_applied(created.len(), e));
                }
            }
        }

        Ok(created)
    }

    // ---- Office 365 permissions ----

    /// Office 365 permissions currently granted to the application.
    pub async fn get_o365_permissions_for_app(
        &self,
        object_id: &str,
    ) -> ManagerResult<Vec<ServicePermissionEntry>> {
        let application = self.get_application_by_object_id(object_id).await?;
        let Some(app_id) = application.app_id.as_deref() else {
            return Ok(Vec::new());
        };

        let active = self.require_session()?;
        let snapshot = self.permission_snapshot(&active, app_id).await?;
        Ok(snapshot.current.entries())
    }

    /// Make the application's Office 365 grants match `desired`.
    ///
    /// Current grants are read fresh. Each affected resource gets one change
    /// (create, replace or revoke); changes for different resources run
    /// concurrently. Nothing is rolled back on failure: the first error is
    /// returned as `PartiallyApplied` if other writes went through.
    pub async fn set_o365_permissions_for_app(
        &self,
        application: Application,
        desired: &[ServicePermissionEntry],
    ) -> ManagerResult<Application> {
        let active = self.require_session()?;
        let app_id = application.app_id.as_deref().ok_or_else(|| {
            ManagerError::Validation("application is not registered".to_string())
        })?;

        let snapshot = self.permission_snapshot(&active, app_id).await?;
        let plan = snapshot.current.plan(desired)?;

        if plan.is_empty() {
            debug!("Permissions of {} already up to date", application.display_name);
            return Ok(application);
        }

        let mut scheduled = Vec::with_capacity(plan.changes().len());
        for change in plan.changes() {
            let resource = change.resource();
            let resource_id = snapshot.resource_ids.get(&resource).ok_or_else(|| {
                ManagerError::Validation(format!("{} is not available in this tenant", resource))
            })?;
            scheduled.push((change, resource_id.as_str()));
        }

        info!(
            "Updating permissions of {}: {} to create, {} to replace, {} to revoke",
            application.display_name,
            plan.creates(),
            plan.replaces(),
            plan.revokes()
        );

        let mut applied = 0;
        let client_id = match snapshot.client_ids.first() {
            Some(id) => id.clone(),
            None => {
                self.ensure_current(&active)?;
                info!("Creating service principal for {}", app_id);
                let result = self
                    .client
                    .create_service_principal(&active.session, &ServicePrincipal::for_app(app_id))
                    .await;
                let principal = self.remote(&active, result)?;
                applied += 1;
                principal.object_id.ok_or_else(|| {
                    ManagerError::after_applied(
                        applied,
                        ManagerError::RemoteTransport(
                            "invalid response: service principal without object id".to_string(),
                        ),
                    )
                })?
            }
        };

        let results = join_all(
            scheduled
                .into_iter()
                .map(|(change, resource_id)| self.apply_change(&active, &client_id, resource_id, change)),
        )
        .await;

        let mut first_error = None;
        for (count, result) in results {
            applied += count;
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            None => {
                info!("Permissions of {} updated", application.display_name);
                Ok(application)
            }
            Some(e) => {
                error!(
                    "Updating permissions of {} failed after {} change(s): {}",
                    application.display_name, applied, e
                );
                Err(ManagerError::after_applied(applied, e))
            }
        }
    }

    async fn permission_snapshot(
        &self,
        active: &ActiveSession,
        app_id: &str,
    ) -> ManagerResult<PermissionSnapshot> {
        let fetched = futures::try_join!(
            self.client.list_service_principals(&active.session),
            self.client.list_permission_grants(&active.session),
        );
        let (principals, grants) = self.remote(active, fetched)?;

        let client_ids: Vec<String> = principals
            .iter()
            .filter(|sp| sp.app_id.eq_ignore_ascii_case(app_id))
            .filter_map(|sp| sp.object_id.clone())
            .collect();

        let mut resource_principals: HashMap<&str, Office365Resource> = HashMap::new();
        let mut resource_ids: BTreeMap<Office365Resource, String> = BTreeMap::new();
        for sp in &principals {
            if let (Some(resource), Some(id)) =
                (Office365Resource::from_app_id(&sp.app_id), sp.object_id.as_deref())
            {
                resource_principals.insert(id, resource);
                resource_ids.entry(resource).or_insert_with(|| id.to_string());
            }
        }

        let client_set: HashSet<&str> = client_ids.iter().map(String::as_str).collect();
        let current = CurrentPermissions::from_grants(&grants, &client_set, &resource_principals);

        Ok(PermissionSnapshot {
            client_ids,
            resource_ids,
            current,
        })
    }

    /// Apply one resource's change: deletions first, then the new grant.
    ///
    /// Stops before the next write once the session has ended. Returns the number of writes that succeeded alongside the outcome.
    async fn apply_change(
        &self,
        active: &ActiveSession,
        client_id: &str,
        resource_id: &str,
        change: &GrantChange,
    ) -> (usize, ManagerResult<()>) {
        let (grant_ids, scopes) = match change {
            GrantChange::Create { scopes, .. } => (&[][..], Some(scopes.as_slice())),
            GrantChange::Replace {
                grant_ids, scopes, ..
            } => (grant_ids.as_slice(), Some(scopes.as_slice())),
            GrantChange::Revoke { grant_ids, .. } => (grant_ids.as_slice(), None),
        };

        let mut applied = 0;
        for grant_id in grant_ids {
            if let Err(e) = self.ensure_current(active) {
                return (applied, Err(e));
            }
            let result = self.client.delete_permission_grant(&active.session, grant_id).await;
            if let Err(e) = self.remote(active, result) {
                return (applied, Err(e));
            }
            applied += 1;
        }

        if let Some(scopes) = scopes {
            if let Err(e) = self.ensure_current(active) {
                return (applied, Err(e));
            }
            let grant = OAuth2PermissionGrant::all_principals(client_id, resource_id, scopes);
            let result = self.client.create_permission_grant(&active.session, &grant).await;
            if let Err(e) = self.remote(active, result) {
                return (applied, Err(e));
            }
            applied += 1;
        }

        debug!("Applied {:?} on {}", change.resource(), resource_id);
        (applied, Ok(()))
    }

    // ---- Project associations ----

    /// The application associated with `project`.
    ///
    /// Fails with `NotFound` if none was set; there is no remote lookup.
    pub async fn get_application_for_project(&self, project: &ProjectId) -> ManagerResult<Application> {
        self.associations.get(project).ok_or_else(|| {
            ManagerError::NotFound(format!("no application associated with project {}", project))
        })
    }

    pub fn set_application_for_project(&self, project: ProjectId, application: Application) {
        debug!("Associating project {} with {}", project, application.display_name);
        self.associations.set(project, application);
    }

    pub fn remove_application_for_project(&self, project: &ProjectId) -> Option<Application> {
        self.associations.remove(project)
    }
}

/// Checks that do not need the directory.
fn validate_registration(application: &Application) -> ManagerResult<()> {
    if application.display_name.trim().is_empty() {
        return Err(ManagerError::Validation("display name is required".to_string()));
    }

    if application.reply_urls.is_empty() {
        return Err(ManagerError::Validation(
            "at least one reply URL is required".to_string(),
        ));
    }

    let urls = application
        .reply_urls
        .iter()
        .chain(application.homepage.as_ref());
    for url in urls {
        if Url::parse(url).is_err() {
            return Err(ManagerError::Validation(format!(
                "{} is not an absolute URL",
                url
            )));
        }
    }

    Ok(())
}
