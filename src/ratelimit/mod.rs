//! Rate limiting logic.

mod backend;
mod clock;
mod decision;
mod key;
mod limiter;
mod window;

pub use backend::RateLimiterBackend;
pub use clock::{Clock, ManualClock, SystemClock};
pub use decision::RateLimitDecision;
pub use key::{AttemptToken, UserKey};
pub use limiter::{SlidingWindowLimiter, DEFAULT_NAMESPACE};
pub use window::SlidingWindow;
