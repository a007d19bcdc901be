//! HTTP surface: routes, auth middleware and error mapping

pub mod middleware;
pub mod routes;

pub use routes::build_router;
