//! # Rolodex API
//!
//! HTTP surface for contact notes.
//!
//! Features:
//! - Axum-based web server
//! - Tower middleware (auth, request ids, tracing)
//! - Pluggable auth provider with a bundled JWT implementation
//! - Note mutations publish side-effect jobs to the note queue
//! - API and worker roles with graceful shutdown

pub mod auth;
pub mod error;
pub mod jobs;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use auth::{AuthProvider, AuthUser, Claims, JwtAuth};
pub use error::{ApiError, ApiResult};
pub use jobs::NoteSideEffectJob;
pub use server::{build_router, init_tracing, RolodexServer, ServerConfig, ServerRole};
pub use state::AppState;
