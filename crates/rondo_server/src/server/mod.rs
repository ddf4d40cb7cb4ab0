#![forbid(unsafe_code)]

pub mod auth;
pub mod commands;
pub mod directory;
pub mod limiter;
pub mod quota;
pub mod registry;
pub mod router;
pub mod session;
pub mod store;
pub mod ws;
