use axum::{
    extract::{ConnectInfo, FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap},
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use crate::auth::{IdentityResolver, ValidationCodeManager};
use crate::config::Config;
use crate::database::{get_connection, DbPool};
use crate::error::AppError;
use crate::models::{AuthLevel, Credentials};
use crate::photos::{LikeLedger, PhotoStore, PhotosetEngine};

pub const DEVICE_ID_HEADER: &str = "x-device-id";
pub const DEVICE_HASH_HEADER: &str = "x-device-hash";
pub const USERNAME_HEADER: &str = "x-username";
pub const USER_HASH_HEADER: &str = "x-user-hash";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: DbPool,
    pub identity: Arc<IdentityResolver>,
    pub validation: Arc<ValidationCodeManager>,
    pub photos: Arc<PhotoStore>,
    pub photosets: Arc<PhotosetEngine>,
    pub likes: Arc<LikeLedger>,
}

/// Credentials and client address as presented, before any lookup.
#[derive(Clone, Debug, Default)]
pub struct RequestIdentity {
    pub credentials: Credentials,
    pub client_ip: String,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// The address a request is attributed to.
///
/// Forwarding headers only count when the TCP peer is a trusted proxy.
/// `X-Forwarded-For` is read from the right, skipping our own proxies, so a
/// client cannot prepend an address of its choosing.
pub fn client_ip(peer: Option<IpAddr>, headers: &HeaderMap, proxies: &[IpAddr]) -> String {
    let Some(peer) = peer.map(|ip| ip.to_canonical()) else {
        return "unknown".to_string();
    };
    if !proxies.contains(&peer) {
        return peer.to_string();
    }

    let is_proxy = |hop: &str| {
        hop.parse::<IpAddr>()
            .map(|ip| proxies.contains(&ip.to_canonical()))
            .unwrap_or(false)
    };

    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        if let Some(hop) = forwarded
            .rsplit(',')
            .map(str::trim)
            .filter(|hop| !hop.is_empty())
            .find(|hop| !is_proxy(*hop))
        {
            return hop.to_string();
        }
    }

    header_str(headers, "x-real-ip")
        .map(str::to_string)
        .unwrap_or_else(|| peer.to_string())
}

fn credentials_from(parts: &Parts) -> Result<Credentials, AppError> {
    // Fall back to query parameters
    let mut credentials = match parts.uri.query() {
        Some(query) => serde_urlencoded::from_str::<Credentials>(query).unwrap_or_default(),
        None => Credentials::default(),
    };

    let headers = &parts.headers;

    if let Some(raw) = header_str(headers, DEVICE_ID_HEADER) {
        let device_id = raw
            .parse::<i64>()
            .map_err(|_| AppError::BadRequest("Device id must be numeric".to_string()))?;
        credentials.device_id = Some(device_id);
    }
    if let Some(hash) = header_str(headers, DEVICE_HASH_HEADER) {
        credentials.device_hash = Some(hash.to_string());
    }
    if let Some(username) = header_str(headers, USERNAME_HEADER) {
        credentials.username = Some(username.to_string());
    }
    if let Some(hash) = header_str(headers, USER_HASH_HEADER) {
        credentials.hash = Some(hash.to_string());
    }

    Ok(credentials)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequestIdentity
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        Ok(RequestIdentity {
            credentials: credentials_from(parts)?,
            client_ip: client_ip(
                peer,
                &parts.headers,
                app_state.identity.trusted_proxies(),
            ),
        })
    }
}

/// The caller's resolved authorization level. Never rejects on missing
/// credentials; that is `AuthLevel::Anonymous`.
#[derive(Clone, Debug)]
pub struct Caller {
    pub level: AuthLevel,
    pub identity: RequestIdentity,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);
        let identity = RequestIdentity::from_request_parts(parts, state).await?;

        let conn = get_connection(&app_state.pool)?;
        let level = app_state
            .identity
            .resolve(&conn, &identity.credentials, &identity.client_ip)?;

        Ok(Caller { level, identity })
    }
}

/// A caller that resolved to a registered account.
pub struct RequireUser(pub i64);

#[axum::async_trait]
impl<S> FromRequestParts<S> for RequireUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let caller = Caller::from_request_parts(parts, state).await?;

        match caller.level {
            AuthLevel::User(user_id) => Ok(RequireUser(user_id)),
            _ => Err(AppError::UnknownUser),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    fn parts(uri: &str, headers: &[(&str, &str)]) -> Parts {
        let mut builder = Request::builder().uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_headers_override_query() {
        let parts = parts(
            "/x?deviceid=1&devicehash=q&username=q%40x.org&hash=qh",
            &[(DEVICE_ID_HEADER, "1042"), (USER_HASH_HEADER, "hh")],
        );
        let credentials = credentials_from(&parts).unwrap();

        assert_eq!(credentials.device_id, Some(1042));
        assert_eq!(credentials.device_hash.as_deref(), Some("q"));
        assert_eq!(credentials.username.as_deref(), Some("q@x.org"));
        assert_eq!(credentials.hash.as_deref(), Some("hh"));
    }

    #[test]
    fn test_non_numeric_device_id_is_bad_request() {
        let parts = parts("/x", &[(DEVICE_ID_HEADER, "abc")]);
        assert!(matches!(
            credentials_from(&parts),
            Err(AppError::BadRequest(_))
        ));
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_client_ip_ignores_headers_from_direct_peers() {
        let forged = parts(
            "/",
            &[("x-forwarded-for", "10.0.0.1"), ("x-real-ip", "10.0.0.1")],
        );

        assert_eq!(
            client_ip(Some(ip("203.0.113.5")), &forged.headers, &[]),
            "203.0.113.5"
        );
        assert_eq!(
            client_ip(Some(ip("203.0.113.5")), &forged.headers, &[ip("192.0.2.1")]),
            "203.0.113.5"
        );
        assert_eq!(client_ip(None, &forged.headers, &[]), "unknown");
    }

    #[test]
    fn test_client_ip_behind_trusted_proxy() {
        let proxies = [ip("192.0.2.1"), ip("192.0.2.2")];

        // The client prepended a forged hop; the proxies appended the real one
        let chained = parts(
            "/",
            &[("x-forwarded-for", "10.0.0.1, 198.51.100.4, 192.0.2.2")],
        );
        assert_eq!(
            client_ip(Some(ip("192.0.2.1")), &chained.headers, &proxies),
            "198.51.100.4"
        );

        let real = parts("/", &[("x-real-ip", "198.51.100.9")]);
        assert_eq!(
            client_ip(Some(ip("192.0.2.1")), &real.headers, &proxies),
            "198.51.100.9"
        );

        let bare = parts("/", &[]);
        assert_eq!(
            client_ip(Some(ip("::ffff:192.0.2.1")), &bare.headers, &proxies),
            "192.0.2.1"
        );
    }
}
