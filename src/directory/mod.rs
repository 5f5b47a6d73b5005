//! Directory service boundary.
//!
//! [`DirectoryServiceClient`] is the raw remote API the manager drives. The
//! manager is its only consumer; every call takes the session whose token it
//! should use.

pub mod graph;
pub mod models;

use async_trait::async_trait;

use crate::auth::Session;
use crate::error::DirectoryResult;

pub use graph::GraphDirectoryClient;
pub use models::{Application, OAuth2PermissionGrant, ServicePrincipal};

/// Raw calls against the remote directory.
#[async_trait]
pub trait DirectoryServiceClient: Send + Sync {
    /// Run the interactive sign-in and return the new session.
    async fn interactive_login(&self) -> DirectoryResult<Session>;

    // Applications
    async fn list_applications(&self, session: &Session) -> DirectoryResult<Vec<Application>>;
    async fn get_application(
        &self,
        session: &Session,
        object_id: &str,
    ) -> DirectoryResult<Application>;
    async fn create_application(
        &self,
        session: &Session,
        application: &Application,
    ) -> DirectoryResult<Application>;
    async fn update_application(
        &self,
        session: &Session,
        application: &Application,
    ) -> DirectoryResult<Application>;
    async fn delete_application(&self, session: &Session, object_id: &str) -> DirectoryResult<()>;

    // Service principals
    async fn list_service_principals(
        &self,
        session: &Session,
    ) -> DirectoryResult<Vec<ServicePrincipal>>;
    async fn create_service_principal(
        &self,
        session: &Session,
        service_principal: &ServicePrincipal,
    ) -> DirectoryResult<ServicePrincipal>;
    async fn delete_service_principal(
        &self,
        session: &Session,
        object_id: &str,
    ) -> DirectoryResult<()>;

    // OAuth2 permission grants
    async fn list_permission_grants(
        &self,
        session: &Session,
    ) -> DirectoryResult<Vec<OAuth2PermissionGrant>>;
    async fn create_permission_grant(
        &self,
        session: &Session,
        grant: &OAuth2PermissionGrant,
    ) -> DirectoryResult<OAuth2PermissionGrant>;
    async fn update_permission_grant(
        &self,
        session: &Session,
        grant: &OAuth2PermissionGrant,
    ) -> DirectoryResult<OAuth2PermissionGrant>;
    async fn delete_permission_grant(
        &self,
        session: &Session,
        object_id: &str,
    ) -> DirectoryResult<()>;
}
