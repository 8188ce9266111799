//! Codeflow action service
//!
//! Executes workflow extension actions — outbound webhooks, sandboxed user
//! scripts, and formula evaluation — behind HMAC-verified endpoints with an
//! always-200 response contract.

pub mod app_state;
pub mod config;
pub mod dto;
pub mod handlers;
pub mod middleware;
pub mod recorder;
pub mod router;

pub use app_state::AppState;
pub use config::{AppConfig, ConfigError, Environment};
pub use router::{create_router, serve};
