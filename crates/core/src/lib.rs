// Core building blocks for Toolhost: hashing, rate limiting, storage and identity

pub mod hashing;
pub mod identity;
pub mod rate_limit;
pub mod storage;

pub use identity::{AuthConfig, AuthError, CredentialResolver, Identity, IdentityIndex};
pub use rate_limit::{create_rate_limiter, RateLimitConfig, RateLimiter};
pub use storage::{MemoryStorage, StorageBackend, StorageError, StorageResult};
