//! Loss-protection gates.
//!
//! The circuit breaker pauses trading on loss patterns: consecutive
//! losses, a high loss rate over the recent window, and a daily loss
//! limit anchored to the balance of the day's first trade. A pause is
//! not an error — trading resumes by itself when the pause window
//! ends or the day rolls over.

pub mod breaker;
pub mod error;
pub mod state;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, DailyLossConfig, PauseNotice, Verdict};
pub use error::{ProtectError, ProtectResult};
pub use state::CircuitBreakerState;
