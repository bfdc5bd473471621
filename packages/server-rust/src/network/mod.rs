//! HTTP surface: configuration, lifecycle, middleware, handlers and server.

pub mod config;
pub mod handlers;
pub mod lifecycle;
pub mod middleware;
pub mod server;

pub use config::*;
pub use handlers::AppState;
pub use lifecycle::*;
pub use server::LocaleServer;
