use rusqlite::{Connection, Row};
use std::net::IpAddr;
use tracing::{debug, info};

use crate::auth::device_token::create_device_hash;
use crate::config::SecurityConfig;
use crate::database::{execute_query, fetch_one, insert_returning_id, queries, with_transaction};
use crate::error::{AppError, AppResult};
use crate::models::{AuthLevel, Credentials, Device, Photo, PhotoUser};

/// Turns presented credentials into an authorization level.
///
/// Precedence is registered user, then registered device, then trusted
/// network. Failing every check is `Anonymous`, never an error; only store
/// failures surface as errors.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    security: SecurityConfig,
    trusted: Vec<IpAddr>,
    proxies: Vec<IpAddr>,
}

pub(crate) fn map_device_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        id: row.get(0)?,
        device_id: row.get(1)?,
        device_hash: row.get(2)?,
        user_id: row.get(3)?,
        device_ip: row.get(4)?,
    })
}

pub(crate) fn map_user_row(row: &Row<'_>) -> rusqlite::Result<PhotoUser> {
    Ok(PhotoUser {
        id: row.get(0)?,
        email: row.get(1)?,
        hash: row.get(2)?,
        validation_code: row.get(3)?,
        retry_count: row.get(4)?,
        validated: row.get::<_, i64>(5)? != 0,
        allow_mailing: row.get::<_, i64>(6)? != 0,
        display_name: row.get(7)?,
    })
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl IdentityResolver {
    pub fn new(security: &SecurityConfig) -> Self {
        Self {
            security: security.clone(),
            trusted: security.trusted_addresses(),
            proxies: security.trusted_proxy_addresses(),
        }
    }

    pub fn trusted_proxies(&self) -> &[IpAddr] {
        &self.proxies
    }

    pub fn resolve(
        &self,
        conn: &Connection,
        credentials: &Credentials,
        client_ip: &str,
    ) -> AppResult<AuthLevel> {
        if let Some(user) = self.lookup_user(conn, credentials)? {
            return Ok(AuthLevel::User(user.id));
        }

        if let Some(device) = self.lookup_device(conn, credentials)? {
            return Ok(AuthLevel::Device(device.id));
        }

        if self.is_trusted(client_ip) {
            return Ok(AuthLevel::TrustedNetwork);
        }

        Ok(AuthLevel::Anonymous)
    }

    /// Resolves like [`resolve`](Self::resolve) and, when a user resolves and
    /// valid device credentials came along, links that device to the user.
    pub fn resolve_and_link(
        &self,
        conn: &Connection,
        credentials: &Credentials,
        client_ip: &str,
    ) -> AppResult<AuthLevel> {
        let level = self.resolve(conn, credentials, client_ip)?;

        if let AuthLevel::User(user_id) = level {
            if let Some(device) = self.lookup_device(conn, credentials)? {
                link_user_to_device(conn, user_id, &device)?;
            }
        }

        Ok(level)
    }

    pub fn lookup_user(
        &self,
        conn: &Connection,
        credentials: &Credentials,
    ) -> AppResult<Option<PhotoUser>> {
        if !credentials.has_user() {
            return Ok(None);
        }

        let username = normalize_email(credentials.username.as_deref().unwrap_or_default());
        let hash = credentials.hash.as_deref().unwrap_or_default();

        fetch_one(
            conn,
            queries::users::SELECT_BY_CREDENTIALS,
            &[&username, &hash],
            map_user_row,
        )
    }

    pub fn lookup_device(
        &self,
        conn: &Connection,
        credentials: &Credentials,
    ) -> AppResult<Option<Device>> {
        if !credentials.has_device() {
            return Ok(None);
        }

        let device_id = credentials.device_id.unwrap_or_default();
        let device_hash = credentials.device_hash.as_deref().unwrap_or_default();

        fetch_one(
            conn,
            queries::devices::SELECT_BY_CREDENTIALS,
            &[&device_id, &device_hash],
            map_device_row,
        )
    }

    pub fn is_trusted(&self, client_ip: &str) -> bool {
        client_ip
            .trim()
            .parse::<IpAddr>()
            .map(|ip| self.trusted.contains(&ip.to_canonical()))
            .unwrap_or(false)
    }

    /// Creates a device row and mints its external id and hash in one step.
    pub fn register_device(&self, conn: &mut Connection, client_ip: &str) -> AppResult<Device> {
        let device = with_transaction(conn, |tx| {
            let id = insert_returning_id(tx, queries::devices::INSERT, &[&client_ip])?;
            let device_id = id + self.security.device_id_offset;
            let device_hash = create_device_hash(device_id, client_ip, &self.security)?;

            execute_query(
                tx,
                queries::devices::UPDATE_CREDENTIALS,
                &[&device_id, &device_hash, &id],
            )?;

            Ok(Device {
                id,
                device_id,
                device_hash,
                user_id: 0,
                device_ip: client_ip.to_string(),
            })
        })?;

        info!("Registered device {} from {}", device.device_id, client_ip);
        Ok(device)
    }
}

/// Links a device to an account. Repeating the call is harmless.
pub fn link_user_to_device(conn: &Connection, user_id: i64, device: &Device) -> AppResult<()> {
    if device.user_id == user_id {
        return Ok(());
    }

    execute_query(conn, queries::devices::LINK_USER, &[&user_id, &device.id])?;
    debug!("Linked device {} to user {}", device.device_id, user_id);
    Ok(())
}

/// Gate for destructive operations on a photo.
pub fn authorize_owner(level: AuthLevel, photo: &Photo) -> AppResult<()> {
    match level {
        AuthLevel::TrustedNetwork => Ok(()),
        AuthLevel::User(user_id) if photo.user_id != 0 && photo.user_id == user_id => Ok(()),
        AuthLevel::Device(device_id) if photo.device_id == device_id => Ok(()),
        AuthLevel::Anonymous => Err(AppError::UnknownOwner),
        _ => Err(AppError::Forbidden(format!(
            "Not the owner of photo {}",
            photo.id
        ))),
    }
}
