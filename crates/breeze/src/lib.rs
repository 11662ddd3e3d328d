pub mod agent;
pub mod chat;
pub mod errors;
pub mod models;
pub mod providers;
pub mod session;
pub mod tools;
