pub mod config;
pub mod organization;
pub mod session;
pub mod shared;
