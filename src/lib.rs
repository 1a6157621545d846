pub mod cache;
pub mod cli;
pub mod colors;
pub mod config;
pub mod error;
pub mod fetch;
pub mod fsutil;
pub mod installer;
pub mod lockfile;
pub mod manifest;
pub mod naming;
pub mod registry;
pub mod resolver;
#[cfg(test)]
pub mod tests;
