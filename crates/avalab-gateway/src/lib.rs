pub mod auth;
pub mod connection;
pub mod dispatcher;
pub mod error;

pub use dispatcher::{Dispatcher, SessionId};
pub use error::{AuthError, GatewayError};
