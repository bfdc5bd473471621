//! Concrete [`KeyValueBackend`](super::KeyValueBackend) implementations.

mod cookie;
mod local;

pub use cookie::CookieStore;
pub use local::LocalStore;
