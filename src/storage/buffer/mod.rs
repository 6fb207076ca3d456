pub mod error;
pub mod manager;
pub mod page_guard;
mod replacer;

pub use error::BufferPoolError;
pub use manager::{BufferPoolConfig, BufferPoolManager};
pub use page_guard::PageGuard;
pub use replacer::ClockReplacer;
