//! Pipeline stages for security, rate limiting and input handling.
//!
//! Registered by [`routes::build_pipeline`](crate::routes::build_pipeline) in
//! this order:
//!
//! ```text
//! SecurityHeaders → RateLimiter (/api) → BodyDecoder → Sanitizer
//!     → ParameterDeduplicator → StaticAssets → RequestStamp → routers
//!        ↓                ↓              ↓                ↓
//!   headers on      429 Too Many    413 / 400      short-circuit
//!   every response   Requests                      with a file
//! ```
//!
//! # Security Considerations
//!
//! - Forwarding headers are only believed from trusted proxy ranges
//! - Operator keys (`$gt`, `a.b`) never reach handlers
//! - Bodies are bounded before any handler runs

pub mod body;
pub mod hpp;
pub mod ip;
pub mod rate_limit;
pub mod sanitize;
pub mod security_headers;
pub mod stamp;
pub mod static_files;

pub use body::BodyDecoder;
pub use hpp::ParameterDeduplicator;
pub use ip::{CidrRange, TrustedProxyConfig, UNKNOWN_IP, client_identity};
pub use rate_limit::{MemoryStore, RateLimitConfig, RateLimitError, RateLimitStore, RateLimiter};
pub use sanitize::Sanitizer;
pub use security_headers::SecurityHeaders;
pub use stamp::{REQUEST_ID_HEADER, RequestStamp};
pub use static_files::StaticAssets;
