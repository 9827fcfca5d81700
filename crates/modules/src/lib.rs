pub mod dispatcher;
pub mod provider;
pub mod registry;

pub use dispatcher::{module_candidates, CommandDispatcher, Dispatch};
pub use provider::CapabilityProvider;
pub use registry::{CapabilityRegistry, ProviderInfo, RegistryHandle};
