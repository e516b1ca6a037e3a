//! Caller context middleware for Axum
//!
//! Authentication happens upstream. The gateway forwards the resolved
//! identity as trusted headers, which this middleware turns into a
//! [`CallerContext`] request extension for handlers.

use std::fmt;
use std::str::FromStr;

use axum::{
    extract::Request,
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use courierdesk_billing::PostingContext;
use serde_json::json;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const CLIENT_ID_HEADER: &str = "x-client-id";
pub const ROLE_HEADER: &str = "x-user-role";
pub const CLIENT_NAME_HEADER: &str = "x-client-name";

/// Role of the caller within the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Platform operator, may act on any tenant
    SuperAdmin,
    /// Tenant administrator
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "super_admin" | "superadmin" => Ok(Role::SuperAdmin),
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            _ => Err(AuthError::InvalidRole),
        }
    }
}

/// Identity of the caller, resolved upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerContext {
    pub user_id: String,
    pub client_id: String,
    pub role: Role,
    pub client_name: Option<String>,
}

impl CallerContext {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AuthError> {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|h| h.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        let client_id = header(CLIENT_ID_HEADER).ok_or(AuthError::MissingAuth)?;
        let role = header(ROLE_HEADER).ok_or(AuthError::MissingAuth)?.parse()?;
        let user_id = header(USER_ID_HEADER).ok_or(AuthError::MissingAuth)?;

        Ok(Self {
            user_id,
            client_id,
            role,
            client_name: header(CLIENT_NAME_HEADER),
        })
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }

    /// Platform operators only.
    pub fn require_super_admin(&self) -> Result<(), AuthError> {
        if self.is_super_admin() {
            Ok(())
        } else {
            tracing::warn!(
                user_id = %self.user_id,
                client_id = %self.client_id,
                role = %self.role,
                "Unauthorized admin access attempt"
            );
            Err(AuthError::InsufficientPermissions)
        }
    }

    /// Tenant administrators (and platform operators).
    pub fn require_tenant_admin(&self) -> Result<(), AuthError> {
        match self.role {
            Role::SuperAdmin | Role::Admin => Ok(()),
            Role::User => {
                tracing::warn!(
                    user_id = %self.user_id,
                    client_id = %self.client_id,
                    "Tenant admin action attempted by user"
                );
                Err(AuthError::InsufficientPermissions)
            }
        }
    }

    /// Posting context for ledger writes made on behalf of this caller.
    pub fn posting_context(&self) -> PostingContext {
        let ctx = PostingContext::user(self.user_id.clone());
        match &self.client_name {
            Some(name) => ctx.with_client_name(name.clone()),
            None => ctx,
        }
    }
}

/// Middleware that requires a resolved caller
pub async fn require_caller(mut request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();

    match CallerContext::from_headers(request.headers()) {
        Ok(caller) => {
            tracing::debug!(
                path = %path,
                user_id = %caller.user_id,
                client_id = %caller.client_id,
                role = %caller.role,
                "require_caller: caller resolved"
            );
            request.extensions_mut().insert(caller);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(path = %path, error = ?err, "require_caller: rejected");
            err.into_response()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Unknown role")]
    InvalidRole,
    #[error("Insufficient permissions")]
    InsufficientPermissions,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingAuth => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::InvalidRole => (StatusCode::UNAUTHORIZED, "Unknown role"),
            AuthError::InsufficientPermissions => {
                (StatusCode::FORBIDDEN, "Insufficient permissions")
            }
        };

        let body = Json(json!({
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}
