#![doc = include_str!("../README.md")]

pub mod call;
pub mod channel;
pub mod client;
mod error;
pub mod server;
pub mod stream;
pub mod telemetry;

pub use call::{CallContext, CallId, CallShape, Side};
pub use client::{CallOptions, Client, ClientStreamingCall};
pub use error::{Error, Result};
pub use server::{Request, ResponseStream, Server, ServerCall, Service};
pub use stream::{Received, SendHalf, Streaming};
// Public re-export so handlers and callers can name statuses without a direct
// `tonic` dependency.
pub use tonic::{Code, Status};

#[cfg(test)]
mod tests;
