#![warn(rust_2018_idioms)]

mod server;
pub mod settings;

pub use server::{run, Stats, DISPLAY_NAME_HEADER, USER_ID_HEADER};
