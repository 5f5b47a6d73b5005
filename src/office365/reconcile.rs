//! Projection of permission grants onto services, and the grant changes
//! needed to move from the current state to a requested one.
//!
//! Nothing here talks to the directory. The manager fetches grants and
//! principals, builds a [`CurrentPermissions`], asks it for a
//! [`PermissionPlan`] and applies the changes.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::directory::OAuth2PermissionGrant;
use crate::error::{ManagerError, ManagerResult};

use super::{Office365Resource, Office365Service, PermissionList, ServicePermissionEntry};

#[derive(Debug, Clone, Default, PartialEq)]
struct ResourceGrants {
    grant_ids: Vec<String>,
    /// Catalogued scopes in canonical spelling, anything else verbatim.
    scopes: BTreeSet<String>,
}

impl ResourceGrants {
    fn unmanaged<'a>(&'a self, resource: Office365Resource) -> impl Iterator<Item = &'a String> {
        self.scopes
            .iter()
            .filter(move |s| resource.known_scope(s).is_none())
    }
}

/// Grants an application currently holds on Office 365 resources.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrentPermissions {
    resources: BTreeMap<Office365Resource, ResourceGrants>,
}

impl CurrentPermissions {
    /// Collects the grants issued to any of `client_ids` whose resource is
    /// one of `resource_principals` (resource principal objectId to resource).
    ///
    /// Several grants to the same resource are merged.
    pub fn from_grants(
        grants: &[OAuth2PermissionGrant],
        client_ids: &HashSet<&str>,
        resource_principals: &HashMap<&str, Office365Resource>,
    ) -> Self {
        let mut resources: BTreeMap<Office365Resource, ResourceGrants> = BTreeMap::new();

        for grant in grants {
            if !client_ids.contains(grant.client_id.as_str()) {
                continue;
            }
            let Some(&resource) = resource_principals.get(grant.resource_id.as_str()) else {
                continue;
            };

            let entry = resources.entry(resource).or_default();
            if let Some(id) = &grant.object_id {
                entry.grant_ids.push(id.clone());
            }
            for scope in grant.scopes() {
                let scope = match resource.known_scope(scope) {
                    Some((_, canonical)) => canonical.to_string(),
                    None => scope.to_string(),
                };
                entry.scopes.insert(scope);
            }
        }

        Self { resources }
    }

    /// One entry per service with at least one granted scope, in catalogue order.
    pub fn entries(&self) -> Vec<ServicePermissionEntry> {
        Office365Service::ALL
            .into_iter()
            .filter_map(|service| {
                let grants = self.resources.get(&service.resource())?;
                let permissions: PermissionList = grants
                    .scopes
                    .iter()
                    .filter(|s| service.canonical_scope(s).is_some())
                    .cloned()
                    .collect();
                (!permissions.is_empty()).then_some(ServicePermissionEntry {
                    service,
                    permissions,
                })
            })
            .collect()
    }

    /// Resources the application holds at least one grant on.
    pub fn resources(&self) -> impl Iterator<Item = Office365Resource> + '_ {
        self.resources.keys().copied()
    }

    /// Grant changes that make the catalogued scopes equal to `desired`.
    ///
    /// Services missing from `desired`, or listed with no permissions, lose
    /// their scopes. Scopes outside the catalogue are kept as they are.
    /// Fails with `Validation` if an entry names a scope its service does
    /// not own.
    pub fn plan(&self, desired: &[ServicePermissionEntry]) -> ManagerResult<PermissionPlan> {
        let mut wanted: BTreeMap<Office365Resource, BTreeSet<String>> = BTreeMap::new();

        for entry in desired {
            let scopes = wanted.entry(entry.service.resource()).or_default();
            for scope in entry.permissions.iter() {
                let canonical = entry.service.canonical_scope(scope).ok_or_else(|| {
                    ManagerError::Validation(format!(
                        "{} is not a {} permission",
                        scope, entry.service
                    ))
                })?;
                scopes.insert(canonical.to_string());
            }
        }

        let mut changes = Vec::new();

        for resource in Office365Resource::ALL {
            let current = self.resources.get(&resource);

            let mut target: BTreeSet<String> = wanted.remove(&resource).unwrap_or_default();
            if let Some(current) = current {
                target.extend(current.unmanaged(resource).cloned());
            }

            let change = match current.filter(|c| !c.grant_ids.is_empty()) {
                None => (!target.is_empty()).then(|| GrantChange::Create {
                    resource,
                    scopes: target.into_iter().collect(),
                }),
                Some(current) if target.is_empty() => Some(GrantChange::Revoke {
                    resource,
                    grant_ids: current.grant_ids.clone(),
                }),
                Some(current) if current.grant_ids.len() == 1 && current.scopes == target => None,
                Some(current) => Some(GrantChange::Replace {
                    resource,
                    grant_ids: current.grant_ids.clone(),
                    scopes: target.into_iter().collect(),
                }),
            };

            changes.extend(change);
        }

        Ok(PermissionPlan { changes })
    }
}

/// One write against the grants of a single resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrantChange {
    /// No grant exists yet.
    Create {
        resource: Office365Resource,
        scopes: Vec<String>,
    },
    /// Delete the existing grants, then create one with `scopes`.
    Replace {
        resource: Office365Resource,
        grant_ids: Vec<String>,
        scopes: Vec<String>,
    },
    /// Delete the existing grants.
    Revoke {
        resource: Office365Resource,
        grant_ids: Vec<String>,
    },
}

impl GrantChange {
    pub fn resource(&self) -> Office365Resource {
        match self {
            Self::Create { resource, .. }
            | Self::Replace { resource, .. }
            | Self::Revoke { resource, .. } => *resource,
        }
    }
}

/// Changes for one reconciliation, at most one per resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionPlan {
    changes: Vec<GrantChange>,
}

impl PermissionPlan {
    pub fn changes(&self) -> &[GrantChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn creates(&self) -> usize {
        self.count(|c| matches!(c, GrantChange::Create { .. }))
    }

    pub fn replaces(&self) -> usize {
        self.count(|c| matches!(c, GrantChange::Replace { .. }))
    }

    pub fn revokes(&self) -> usize {
        self.count(|c| matches!(c, GrantChange::Revoke { .. }))
    }

    fn count(&self, f: impl Fn(&GrantChange) -> bool) -> usize {
        self.changes.iter().filter(|c| f(c)).count()
    }
}
