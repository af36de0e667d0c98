#![doc = include_str!("../README.md")]

mod config;
mod error;

pub mod process;
pub mod reassembly;
pub mod request;
pub mod sio;
pub mod state;
pub mod transfer;

pub use config::Config;
pub use error::{Error, Result};
