pub mod endpoint;
pub mod entry;
pub mod message;
pub mod session;
pub mod totals;
pub mod usage;

pub use endpoint::{CapturedEndpoint, CapturedRequest, EndpointKind};
pub use entry::LocalUsageEvent;
pub use message::{MessageUsage, TranscriptLine};
pub use session::{SessionSnapshot, SessionState, TokenUsage, UsageHistoryEntry};
pub use totals::UsageTotals;
pub use usage::{MonthlyCredits, PrepaidCredits, UsageRecord, UsageSource, UsageWindow};
