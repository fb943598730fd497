//! Switchboard core library: intent classification, user and context stores, the package
//! registry and dispatcher, reply routing, and the gateway used by the CLI.

pub mod channels;
pub mod classifier;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod gateway;
pub mod init;
pub mod packages;
pub mod routing;
pub mod transcript;
pub mod types;
pub mod users;
