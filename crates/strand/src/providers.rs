//! Converters from upstream message formats into thread messages.
//!
//! Each provider turns one upstream record type into the loose
//! [`MessageLike`](crate::models::message_like::MessageLike) shape, either
//! directly for an external store or through
//! [`ExternalMessageConverter`](crate::converter::ExternalMessageConverter).
pub mod ai_sdk;
pub mod langchain;
