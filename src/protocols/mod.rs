pub mod chat;
pub mod event_types;
pub mod messages;
pub mod responses;
