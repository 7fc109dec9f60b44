pub mod config;
pub mod protocol;
pub mod server;
pub mod shutdown;

pub use server::Server;
