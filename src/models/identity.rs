use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq)]
pub struct Device {
    pub id: i64,
    /// External id handed to the app, `id + device_id_offset`.
    pub device_id: i64,
    pub device_hash: String,
    pub user_id: i64,
    pub device_ip: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhotoUser {
    pub id: i64,
    pub email: String,
    pub hash: String,
    pub validation_code: String,
    pub retry_count: i64,
    pub validated: bool,
    pub allow_mailing: bool,
    pub display_name: String,
}

/// Credentials presented with a request. Every part is optional; the
/// resolver decides what level they add up to.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Credentials {
    #[serde(rename = "deviceid")]
    pub device_id: Option<i64>,
    #[serde(rename = "devicehash")]
    pub device_hash: Option<String>,
    pub username: Option<String>,
    pub hash: Option<String>,
}

impl Credentials {
    pub fn has_device(&self) -> bool {
        self.device_id.is_some() && self.device_hash.as_deref().is_some_and(|h| !h.is_empty())
    }

    pub fn has_user(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.trim().is_empty())
            && self.hash.as_deref().is_some_and(|h| !h.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthLevel {
    User(i64),
    /// Internal device id.
    Device(i64),
    TrustedNetwork,
    Anonymous,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegisterResponse {
    pub device_id: i64,
    pub device_hash: String,
}

#[derive(Debug, Deserialize)]
pub struct CodeRequest {
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct CodeSentResponse {
    pub sent: bool,
}

#[derive(Debug, Deserialize)]
pub struct CodeCheckRequest {
    pub email: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct CodeCheckResponse {
    pub hash: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRequest {
    #[serde(alias = "displayname")]
    pub display_name: Option<String>,
    #[serde(alias = "allowmailing")]
    pub allow_mailing: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileResponse {
    pub email: String,
    pub display_name: String,
    pub allow_mailing: bool,
    pub device_count: i64,
}
