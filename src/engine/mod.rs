pub mod command;
pub mod config;
pub mod game;
pub mod observation;
pub mod server;
