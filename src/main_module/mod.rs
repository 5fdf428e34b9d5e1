//! Startup pieces split from main.rs: seeding, health checks, the server
//! and shutdown handling.

mod bootstrap;
mod health;
mod server;
mod shutdown;

pub use bootstrap::*;
pub use health::*;
pub use server::*;
pub use shutdown::*;
