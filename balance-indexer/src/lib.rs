pub mod balance;
pub mod btc;
pub mod chain;
pub mod checkpoint;
pub mod coin;
pub mod colored;
pub mod config;
pub mod db;
pub mod fetcher;
pub mod index;
pub mod output;
pub mod script;

#[cfg(test)]
mod test_util;

#[macro_use]
extern crate log;
