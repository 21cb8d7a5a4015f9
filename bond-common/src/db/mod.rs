//! Database setup shared by the local store and the SQLite document store

pub mod init;

pub use init::*;
