use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::SecurityConfig;
use crate::error::AppResult;

/// Claims sealed into a device hash. The token itself is opaque to clients
/// and compared for equality on lookup; decoding is only used for audits.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceClaims {
    pub sub: String,
    pub ip: String,
    pub iat: i64,
    pub nonce: String,
}

pub fn create_device_hash(device_id: i64, ip: &str, security: &SecurityConfig) -> AppResult<String> {
    let claims = DeviceClaims {
        sub: device_id.to_string(),
        ip: ip.to_string(),
        iat: Utc::now().timestamp(),
        nonce: Uuid::new_v4().simple().to_string(),
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(security.secret_key.as_bytes()),
    )?;

    Ok(token)
}

pub fn decode_device_hash(token: &str, security: &SecurityConfig) -> Option<DeviceClaims> {
    let mut validation = Validation::default();
    validation.required_spec_claims.clear();
    validation.validate_exp = false;

    decode::<DeviceClaims>(
        token,
        &DecodingKey::from_secret(security.secret_key.as_bytes()),
        &validation,
    )
    .ok()
    .map(|data| data.claims)
}
