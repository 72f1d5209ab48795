//! 公共基础：存储错误类型、时钟

pub mod clock;
pub mod error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::StoreError;
