//! Office 365 services and their delegated permissions.
//!
//! Every [`Office365Service`] lives on one well-known resource application
//! ([`Office365Resource`]) and owns a fixed set of scope names on it. A
//! permission grant to a resource therefore splits into one
//! [`ServicePermissionEntry`] per service.

pub mod reconcile;

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

pub use reconcile::{CurrentPermissions, GrantChange, PermissionPlan};

/// Well-known resource applications that host Office 365 APIs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Office365Resource {
    ExchangeOnline,
    SharePointOnline,
    AzureActiveDirectory,
}

impl Office365Resource {
    pub const ALL: [Self; 3] = [
        Self::ExchangeOnline,
        Self::SharePointOnline,
        Self::AzureActiveDirectory,
    ];

    /// The resource's appId, identical in every tenant.
    pub fn app_id(&self) -> &'static str {
        match self {
            Self::ExchangeOnline => "00000002-0000-0ff1-ce00-000000000000",
            Self::SharePointOnline => "00000003-0000-0ff1-ce00-000000000000",
            Self::AzureActiveDirectory => "00000002-0000-0000-c000-000000000000",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::ExchangeOnline => "Office 365 Exchange Online",
            Self::SharePointOnline => "Office 365 SharePoint Online",
            Self::AzureActiveDirectory => "Windows Azure Active Directory",
        }
    }

    pub fn from_app_id(app_id: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|r| r.app_id().eq_ignore_ascii_case(app_id))
    }

    /// Services hosted by this resource, in catalogue order.
    pub fn services(&self) -> impl Iterator<Item = Office365Service> + '_ {
        Office365Service::ALL
            .into_iter()
            .filter(move |s| s.resource() == *self)
    }

    /// Canonical spelling of `scope` if some service on this resource owns it.
    ///
    /// Scope names are matched case-insensitively.
    pub fn known_scope(&self, scope: &str) -> Option<(Office365Service, &'static str)> {
        SCOPE_INDEX
            .get(&(*self, scope.to_ascii_lowercase()))
            .copied()
    }
}

impl fmt::Display for Office365Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// Office 365 services an application can be granted access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Office365Service {
    Mail,
    Calendar,
    Contacts,
    Files,
    Lists,
    UserProfile,
}

impl Office365Service {
    pub const ALL: [Self; 6] = [
        Self::Mail,
        Self::Calendar,
        Self::Contacts,
        Self::Files,
        Self::Lists,
        Self::UserProfile,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Mail => "Mail",
            Self::Calendar => "Calendar",
            Self::Contacts => "Contacts",
            Self::Files => "My Files",
            Self::Lists => "Sites and Lists",
            Self::UserProfile => "Users and Groups",
        }
    }

    pub fn resource(&self) -> Office365Resource {
        match self {
            Self::Mail | Self::Calendar | Self::Contacts => Office365Resource::ExchangeOnline,
            Self::Files | Self::Lists => Office365Resource::SharePointOnline,
            Self::UserProfile => Office365Resource::AzureActiveDirectory,
        }
    }

    /// Scope names this service owns on its resource.
    pub fn scopes(&self) -> &'static [&'static str] {
        match self {
            Self::Mail => &["Mail.Read", "Mail.ReadWrite", "Mail.Send"],
            Self::Calendar => &["Calendars.Read", "Calendars.ReadWrite"],
            Self::Contacts => &["Contacts.Read", "Contacts.ReadWrite"],
            Self::Files => &["MyFiles.Read", "MyFiles.Write"],
            Self::Lists => &[
                "AllSites.Read",
                "AllSites.Write",
                "AllSites.Manage",
                "AllSites.FullControl",
            ],
            Self::UserProfile => &["User.Read", "User.ReadBasic.All"],
        }
    }

    /// Canonical spelling of `scope` if this service owns it.
    pub fn canonical_scope(&self, scope: &str) -> Option<&'static str> {
        match self.resource().known_scope(scope) {
            Some((service, canonical)) if service == *self => Some(canonical),
            _ => None,
        }
    }
}

impl fmt::Display for Office365Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// (resource, lowercased scope) -> (owning service, canonical scope)
static SCOPE_INDEX: Lazy<HashMap<(Office365Resource, String), (Office365Service, &'static str)>> =
    Lazy::new(|| {
        Office365Service::ALL
            .into_iter()
            .flat_map(|service| {
                service.scopes().iter().map(move |scope| {
                    (
                        (service.resource(), scope.to_ascii_lowercase()),
                        (service, *scope),
                    )
                })
            })
            .collect()
    });

/// A sorted set of scope names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionList(BTreeSet<String>);

impl PermissionList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, scope: impl Into<String>) -> bool {
        self.0.insert(scope.into())
    }

    pub fn extend(&mut self, other: &PermissionList) {
        self.0.extend(other.0.iter().cloned());
    }

    pub fn contains(&self, scope: &str) -> bool {
        self.0.contains(scope)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl fmt::Display for PermissionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scopes: Vec<&str> = self.iter().collect();
        f.write_str(&scopes.join(" "))
    }
}

/// Requested or granted permissions of one application for one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePermissionEntry {
    pub service: Office365Service,
    pub permissions: PermissionList,
}

impl ServicePermissionEntry {
    pub fn new<S: Into<String>>(
        service: Office365Service,
        permissions: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            service,
            permissions: permissions.into_iter().collect(),
        }
    }
}
