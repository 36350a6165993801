use serde::{Deserialize, Serialize};

/// Which side of a provisioned token a principal is on. A token has
/// exactly one owning principal (spec §3, Token invariant).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrincipalKind {
    Device,
    Client,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub external_account: String,
    pub auth_provider: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mediator {
    pub mediator_id: String,
    pub user_id: String,
    pub permissions: i64,
}

/// A token's logical phase. `provisioned` tokens carry no refresh token;
/// `registered`/`refreshed` do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub token_id: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: String,
    pub user_id: String,
    pub mediator_id: String,
    pub token_id: String,
    pub published_resources: serde_json::Value,
    pub logged_in: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub client_id: String,
    pub user_id: String,
    pub mediator_id: String,
    pub token_id: String,
}

/// The result of a successful `RegisterDevice`/`RegisterClient` or
/// `RefreshToken` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub user_id: String,
    pub refresh_token: String,
    pub ttl_secs: u64,
}

/// An OCF resource-directory link, as filtered by `FindDevice`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLink {
    pub device_id: String,
    pub href: String,
    pub rt: Vec<String>,
    pub if_: Vec<String>,
    pub anchor: Option<String>,
}

/// Filter parameters accepted by `FindDevice` (spec §4.1). Every specified
/// (`Some`) field must match a link for it to be returned; unset fields
/// impose no constraint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FindDeviceQuery {
    pub rt: Option<String>,
    #[serde(rename = "if")]
    pub if_: Option<String>,
    pub href: Option<String>,
    pub anchor: Option<String>,
}
