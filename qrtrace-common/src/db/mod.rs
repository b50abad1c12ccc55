//! Database access shared across QRTrace services

pub mod init;
pub mod models;
pub mod settings;

pub use init::init_database;
