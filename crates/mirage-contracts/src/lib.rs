pub mod chat;
pub mod events;
pub mod models;
pub mod requests;
pub mod session;
