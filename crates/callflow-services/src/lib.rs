#![doc = include_str!("../README.md")]

pub mod calculator;
pub mod config;
pub mod greet;
pub mod proto;
pub mod runtime;
pub mod scenarios;

#[cfg(test)]
mod test_util;
