//! Admission control: at most N admissions per period, shared by concurrent callers.

mod backend;
mod clock;
mod controller;
mod fixed;
mod shutdown;
mod sliding;

pub use backend::{Admission, AdmissionStrategy, Strategy, WindowSnapshot};
pub use clock::{Clock, ManualClock, TokioClock};
pub use controller::AdmissionController;
pub use fixed::FixedWindowLimiter;
pub use sliding::SlidingWindowLimiter;
