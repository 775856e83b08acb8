pub mod chat;
pub mod check;
pub mod config;
