mod error;
mod oauth;
mod orchestrator;
mod session;
pub mod tenant;

pub use error::AuthError;
pub use oauth::{
    classify_poll_response, AuthorityClient, AuthorityEndpoints, DeviceCodeResponse,
    DeviceFlowDetails, PollOutcome, DEFAULT_LOGIN_URL,
};
pub use orchestrator::DeviceFlowManager;
pub use session::{CancelHandle, DeviceFlowSession, FlowState, MIN_BACK_OFF};
