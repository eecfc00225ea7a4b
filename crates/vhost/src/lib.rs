//! Virtual host resolution and in-memory static file cache.
//!
//! Grounded on `spin/vhost/resolve.c++` (domain-directory validation,
//! `_default` fallback, `.neonjsx` route manifests) and
//! `spin/http2_listener/helper/load_static.c++` (static preload).

#![warn(clippy::all)]

mod cache;
mod error;
mod neonjsx;
mod resolver;

pub use cache::{StaticCache, StaticEntry};
pub use error::Error;
pub use neonjsx::NeonJsxConfig;
pub use resolver::{VHostResolver, VirtualHost};

pub type Result<T> = std::result::Result<T, Error>;
