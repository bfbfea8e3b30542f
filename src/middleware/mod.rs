pub mod agent_auth;
pub mod cors;
pub mod panic;

pub use agent_auth::{AdminCaller, AdminGroup, AgentVerifier, Caller};
