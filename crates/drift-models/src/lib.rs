pub mod conversation;
pub mod friend;
pub mod gateway;
pub mod identity;
pub mod message;
pub mod user;
