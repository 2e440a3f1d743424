pub mod cli;
pub mod collector;
pub mod config;
pub mod producer;
pub mod transport;
