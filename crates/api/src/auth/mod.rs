//! Caller identity for CourierDesk API routes

pub mod middleware;

pub use middleware::{
    require_caller, AuthError, CallerContext, Role, CLIENT_ID_HEADER, CLIENT_NAME_HEADER,
    ROLE_HEADER, USER_ID_HEADER,
};
