//! SeaORM entity definitions

pub mod conversations;
pub mod messages;
pub mod users;
