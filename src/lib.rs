pub mod cli;
pub mod client;
pub mod config;
pub mod persistence;
pub mod server;
pub mod simulation;
pub mod world;
