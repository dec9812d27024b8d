mod rate_limit;
mod signature;

pub use rate_limit::RateLimiter;
pub use signature::{SignatureError, SignatureValidator};
