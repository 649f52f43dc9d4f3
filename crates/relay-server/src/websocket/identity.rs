//! Identity of the upgrading client, read from headers set by the
//! authentication layer in front of the relay.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::counter;
use relay_core::{Identity, OrgId, RoleId, UserId};
use thiserror::Error;

use crate::metrics::WS_REJECTED_TOTAL;

/// Required. The authenticated user.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Optional. The user's organization.
pub const ORGANIZATION_HEADER: &str = "x-organization-id";
/// Optional. Comma-separated roles.
pub const ROLES_HEADER: &str = "x-user-roles";

/// Why an upgrade was refused.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum IdentityRejection {
    /// No usable user ID header.
    #[error("missing x-user-id header")]
    MissingUser,
    /// An identity header is not valid visible ASCII.
    #[error("invalid {0} header")]
    InvalidHeader(&'static str),
}

impl IntoResponse for IdentityRejection {
    fn into_response(self) -> Response {
        counter!(WS_REJECTED_TOTAL).increment(1);
        let status = match self {
            Self::MissingUser => StatusCode::UNAUTHORIZED,
            Self::InvalidHeader(_) => StatusCode::BAD_REQUEST,
        };
        (status, self.to_string()).into_response()
    }
}

/// Build an [`Identity`] from request headers.
pub fn identity_from_headers(headers: &HeaderMap) -> Result<Identity, IdentityRejection> {
    let user = header_str(headers, USER_ID_HEADER)?
        .map(str::trim)
        .filter(|u| !u.is_empty())
        .ok_or(IdentityRejection::MissingUser)?;
    let organization = header_str(headers, ORGANIZATION_HEADER)?
        .map(str::trim)
        .unwrap_or_default();
    let roles = header_str(headers, ROLES_HEADER)?
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|r| !r.is_empty())
                .map(RoleId::from)
                .collect()
        })
        .unwrap_or_default();

    Ok(Identity {
        user_id: UserId::from(user),
        organization: OrgId::from(organization),
        roles,
    })
}

fn header_str<'a>(
    headers: &'a HeaderMap,
    name: &'static str,
) -> Result<Option<&'a str>, IdentityRejection> {
    headers
        .get(name)
        .map(|v| v.to_str().map_err(|_| IdentityRejection::InvalidHeader(name)))
        .transpose()
}

/// Extractor wrapper so handlers can take the identity directly.
#[derive(Debug, Clone)]
pub struct ClientIdentity(pub Identity);

impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = IdentityRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        identity_from_headers(&parts.headers).map(Self)
    }
}
