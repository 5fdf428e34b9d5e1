pub mod api;

pub use api::{configure_products_api_routes, Product};
