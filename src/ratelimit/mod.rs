//! Rate limiting logic and state management.

mod backend;
pub mod clock;
mod counter;
mod limiter;

pub use backend::RateLimiterBackend;
pub use clock::{Clock, MockClock, SystemClock};
pub use counter::{TimeWindow, TotalCounter, WindowLog};
pub use limiter::{LocalRateLimiter, DEFAULT_MAX_KEYS};
