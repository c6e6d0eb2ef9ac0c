//! Durable storage: call records and chat membership reads

mod calls;
mod chats;

pub use calls::CallStore;
pub use chats::{ChatDirectory, InMemoryChatDirectory, SqlChatDirectory};
