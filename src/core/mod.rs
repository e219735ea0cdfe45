pub mod config;
pub mod error;
pub mod hanzi;
pub mod io;
