//! Request-side gateway: authentication, credential injection, and the
//! per-call pipeline.

pub mod gatekeeper;
pub mod injector;
pub mod orchestrator;

pub use gatekeeper::{AgentIdentity, Gatekeeper};
pub use injector::{CredentialGuard, Credentials, EnrichedRequest, Injector};
pub use orchestrator::Gateway;
