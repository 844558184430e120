pub mod mock;
pub mod provider;
pub mod registry;
pub mod snapshot;

pub use provider::{MarketDataProvider, ProviderOpenInterest};
pub use registry::ProviderRegistry;
pub use snapshot::get_snapshot;
