pub mod conversation;
pub mod message;

pub use conversation::{Conversation, ConversationScope, Party};
pub use message::{Message, MessageDto};
