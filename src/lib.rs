//! O365 Manager
//!
//! Session and permission orchestration for Office 365 application
//! registrations in an Azure AD tenant.

#![deny(clippy::all)]

pub mod auth;
pub mod config;
pub mod directory;
pub mod error;
pub mod manager;
pub mod office365;

pub use config::Config;
pub use directory::{
    Application, DirectoryServiceClient, GraphDirectoryClient, OAuth2PermissionGrant,
    ServicePrincipal,
};
pub use error::{DirectoryError, DirectoryResult, ManagerError, ManagerResult};
pub use manager::{AuthState, DirectoryServiceManager, ProjectId};
pub use office365::{Office365Resource, Office365Service, PermissionList, ServicePermissionEntry};
