//! Default implementations of the engine's collaborators

mod directory;
mod permissions;
mod selector;

pub use directory::SimpleDirectoryProvider;
pub use permissions::SystemPermissionService;
pub use selector::DirectContentSelector;
