//! Users, sign-in and the identity carried in access tokens.

pub mod auth_routes;
pub mod identity;
pub mod users;

pub use identity::{resolve_identity, Identity};
