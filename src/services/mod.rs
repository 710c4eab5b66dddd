pub mod auth;
pub mod ban;
pub mod counter_store;
pub mod jobs;
pub mod movement;
pub mod notifier;
pub mod product;
pub mod rate_limiter;

pub use auth::{AuthError, Claims, IdentityResolver};
pub use ban::{BanEvent, BanRecorder, BanSummary};
pub use counter_store::{
    CounterStore, CounterStoreError, MemoryCounterStore, RedisCounterStore, WindowCount,
};
pub use jobs::{run_ban_report, BanReportJob, BanReportJobConfig};
pub use movement::{movements_to_csv, MovementError, MovementService};
pub use notifier::{LogNotifier, Notifier};
pub use product::{ProductError, ProductService};
pub use rate_limiter::{RateLimitConfig, RateLimitError, RateLimitStatus, RateLimiterService};
