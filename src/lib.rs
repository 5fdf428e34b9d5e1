//! CRM server: accounts, contacts, leads, deals, activities, products,
//! territories and sales documents behind a JSON API.

pub mod activities;
pub mod api_router;
pub mod core;
pub mod crm;
pub mod dashboards;
pub mod directory;
pub mod main_module;
pub mod products;
pub mod sales;
pub mod security;
pub mod settings;
