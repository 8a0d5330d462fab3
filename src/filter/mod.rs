// Filtering components
pub mod dom;                  // Arena-backed element tree + mutation observer channel
pub mod scheduler;            // Coalescing rescan scheduler (one flush per frame)
pub mod engine;               // FilterEngine: extract handle, hide/show, bounded retry

// Re-export commonly used types
pub use dom::{Document, ElementKind, Mutation, MutationKind, NodeId};
pub use engine::{FilterEngine, FilterStats, HANDLE_ATTR, HIDDEN_ATTR, SEARCH_TIMELINE_NAME};
pub use scheduler::BatchScheduler;
