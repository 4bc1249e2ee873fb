//! RM-01 internet connector: detects the RM-01's AX88179A USB Ethernet link
//! and shares this computer's upstream connection with it.

pub mod app;
pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod event;
pub mod network;

#[cfg(test)]
mod testing;
