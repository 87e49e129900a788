pub mod auth;
pub mod latency;
pub mod routes;
