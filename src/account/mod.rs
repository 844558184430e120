pub mod performance;
pub mod projector;

pub use performance::PerformanceStats;
pub use projector::AccountProjector;
