pub mod converter;
pub mod errors;
pub mod external_store;
pub mod models;
pub mod providers;
pub mod repository;
pub mod telemetry;
pub mod usage;

pub use converter::{ExternalMessage, ExternalMessageConverter, JoinStrategy, ToolResultMessage};
pub use errors::{ConversionError, RepositoryError, ThreadError, ThreadResult};
pub use external_store::{ExternalStoreAdapter, ExternalStoreThread, ThreadUpdate};
pub use models::message::Message;
pub use models::message_like::MessageLike;
pub use repository::MessageRepository;
