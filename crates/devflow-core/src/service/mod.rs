mod client;
mod tokens;

pub use client::{AccountServiceClient, FED_AUTH_REDIRECT_HEADER};
pub use tokens::{SessionTokenService, LOCATION_SERVICE_ID};
