/// Review and commit module
///
/// - External collaborator contracts for places and logs (services.rs)
/// - Session state, readiness and the final commit (session.rs)

pub mod services;
pub mod session;

pub use session::{ReviewSession, ReviewSessionState, SaveReport};
