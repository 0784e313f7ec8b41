pub mod cli;
pub mod commands;
pub mod config;
pub mod copy_tool;
pub mod error;
pub mod listing;
pub mod location;
pub mod logging;
pub mod record;
pub mod selection;
pub mod size;
pub mod transfer;
pub mod util;

pub use error::{Stage, TransferError};
