mod plan;
mod scheduler;

pub use plan::*;
pub use scheduler::*;

/// A pending background download. Lower `priority` drains first; 0 is the
/// next item in the scroll direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefetchItem {
    pub url: String,
    pub priority: u8,
}

impl PrefetchItem {
    pub fn new(url: impl Into<String>, priority: u8) -> Self {
        Self {
            url: url.into(),
            priority,
        }
    }
}
