mod agentdb;

pub use agentdb::{AgentDbError, ApiErrorBody, ApiErrorObject};

pub type Result<T, E = AgentDbError> = std::result::Result<T, E>;

pub trait IsRetryable {
    fn is_retryable(&self) -> bool;
}
