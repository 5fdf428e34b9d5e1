//! Bearer-token authentication and the CRM permission model.
//!
//! The middleware turns an access token into an [`AuthenticatedUser`] that
//! handlers receive as an extractor. Permissions are Django-style codenames
//! (`accounts.view`, `invoices.change`) built from [`Resource`] and [`Action`].

pub mod config;
pub mod error;
pub mod middleware;
#[cfg(test)]
mod tests;
pub mod types;

pub use config::AuthConfig;
pub use error::AuthError;
pub use middleware::{auth_middleware, AuthMiddlewareState};
pub use types::{Action, AuthenticatedUser, Permission, Resource, Role, SUPERUSER_ROLE};
