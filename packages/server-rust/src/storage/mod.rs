//! Storage backends for the locale store.
//!
//! Two independent physical stores hold the same logical keys:
//!
//! - [`CookieStore`]: small, size-limited, mirrors preference and override
//! - [`LocalStore`]: larger quota, optionally persisted, system of record
//!
//! Both implement [`KeyValueBackend`]; every higher layer holds them as
//! `Arc<dyn KeyValueBackend>`.

pub mod backend;
pub mod engines;

pub use backend::*;
pub use engines::{CookieStore, LocalStore};
