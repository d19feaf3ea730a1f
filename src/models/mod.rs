pub mod internal;

pub use internal::{
    Conversation, Message, MessageStatus, NewConversation, NewMessage, NewUser, Role, SoftDeletable,
    SoftDelete, User,
};
