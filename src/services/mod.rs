// Marksync services
// Services are the collaborators the core talks to: auth, remote store, push, settings.

pub mod auth;
pub mod push_hub;
pub mod realtime;
pub mod remote_store;
pub mod rest_store;
pub mod settings_engine;
