//! Composition patterns that combine several agents into one `Agent`.

mod conditional;
mod fallback;
mod parallel;
mod sequential;

pub use conditional::{content_contains, metadata_has_key, role_equals, ConditionalAgent, Condition};
pub use fallback::FallbackAgent;
pub use parallel::{Aggregator, ParallelAgent};
pub use sequential::SequentialAgent;
