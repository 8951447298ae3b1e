#![warn(rust_2018_idioms)]

pub mod deck;
pub mod lobby;
pub mod model;
pub mod protocol;
pub mod server;
