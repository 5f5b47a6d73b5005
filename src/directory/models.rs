//! Directory entities as exchanged with the Azure AD Graph API.

use serde::{Deserialize, Deserializer, Serialize};

/// The directory sends `null` for unset collections and flags.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// An application registration.
///
/// `object_id` and `app_id` are assigned by the directory on creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Application {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_id: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub display_name: String,

    /// Redirect URIs, in the order they were registered.
    #[serde(default, deserialize_with = "null_as_default")]
    pub reply_urls: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    #[serde(default, deserialize_with = "null_as_default")]
    pub available_to_other_tenants: bool,

    #[serde(default, deserialize_with = "null_as_default")]
    pub public_client: bool,
}

impl Application {
    /// A new, not yet registered application.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            ..Default::default()
        }
    }

    /// Adds a reply URL and uses it as homepage if none is set.
    pub fn with_reply_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        if self.homepage.is_none() {
            self.homepage = Some(url.clone());
        }
        self.reply_urls.push(url);
        self
    }

    pub fn is_registered(&self) -> bool {
        self.object_id.is_some()
    }
}

/// The runtime identity of an application inside a tenant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicePrincipal {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,

    /// The application this principal belongs to.
    pub app_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default = "default_true", deserialize_with = "null_as_true")]
    pub account_enabled: bool,

    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub service_principal_names: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn null_as_true<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(Option::<bool>::deserialize(deserializer)?.unwrap_or(true))
}

impl ServicePrincipal {
    /// A principal to be created for `app_id`.
    pub fn for_app(app_id: impl Into<String>) -> Self {
        Self {
            object_id: None,
            app_id: app_id.into(),
            display_name: None,
            account_enabled: true,
            service_principal_names: Vec::new(),
        }
    }
}

/// Consent type for grants that apply to every user in the tenant.
pub const CONSENT_ALL_PRINCIPALS: &str = "AllPrincipals";

/// A delegated permission grant from a client principal to a resource principal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuth2PermissionGrant {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_id: Option<String>,

    /// Object id of the consuming service principal.
    pub client_id: String,

    #[serde(default, deserialize_with = "null_as_default")]
    pub consent_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,

    /// Object id of the resource service principal.
    pub resource_id: String,

    /// Space separated scope names.
    #[serde(default, deserialize_with = "null_as_default")]
    pub scope: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_time: Option<String>,
}

impl OAuth2PermissionGrant {
    /// A tenant-wide grant to be created.
    pub fn all_principals<S: AsRef<str>>(
        client_id: impl Into<String>,
        resource_id: impl Into<String>,
        scopes: &[S],
    ) -> Self {
        Self {
            client_id: client_id.into(),
            consent_type: CONSENT_ALL_PRINCIPALS.to_string(),
            resource_id: resource_id.into(),
            scope: scopes
                .iter()
                .map(|s| s.as_ref())
                .collect::<Vec<_>>()
                .join(" "),
            ..Default::default()
        }
    }

    /// Individual scope names.
    pub fn scopes(&self) -> impl Iterator<Item = &str> {
        self.scope.split_whitespace()
    }
}
