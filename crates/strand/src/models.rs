//! These models represent the objects passed around by the thread runtime
//!
//! There are several related formats the runtime has to accept:
//! - host messages already in the canonical shape, pushed through an external store
//! - vercel ai sdk `UIMessage`s, with their dynamically tagged parts
//! - langchain / langgraph messages and streaming chunks
//!
//! These all overlap to varying degrees. We always convert them into the canonical
//! `Message` before they enter the repository, going through the loose `MessageLike`
//! shape so that missing ids, timestamps and statuses can be filled in consistently.
pub mod content;
pub mod message;
pub mod message_like;
pub mod role;
pub mod status;
