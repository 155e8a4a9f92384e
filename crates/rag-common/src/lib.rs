pub mod errors;
pub mod id;
pub mod types;

pub use errors::{ClientError, ConfigError};
pub use id::{new_correlation_id, SessionId};
pub use types::RetrievalMethod;

pub type Result<T> = std::result::Result<T, ClientError>;
