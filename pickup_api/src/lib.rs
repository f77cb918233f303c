//! The Pinning Service API.
//!
//! [`PinService`] composes a [`StatusStore`](pickup_core::StatusStore) and a
//! [`DispatchQueue`](pickup_core::DispatchQueue) into the add/list/get/
//! replace/delete operations. [`router`] exposes them over HTTP with bearer
//! token authentication.

mod auth;
mod config;
mod http;
mod service;

pub use auth::Authenticator;
pub use config::ApiConfig;
pub use http::{ApiState, router, serve};
pub use service::PinService;
