// Marksync shared type definitions
// Each submodule defines types used across the synchronization core.

pub mod bookmark;
pub mod change;
pub mod edit;
pub mod errors;
pub mod identity;
pub mod settings;
pub mod snapshot;
pub mod subscription;
