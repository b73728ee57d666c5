//! A point-to-point RDMA data-transfer client built on the RDMA connection
//! manager.
//!
//! The client resolves a server, creates a reliable-connected endpoint with
//! single-entry queues, registers a receive buffer (and a send buffer when the
//! device cannot send the message inline), posts the receive, connects, and
//! busy-polls for the message. The received payload is then checked against
//! the `b[i] = i mod 256` pattern and throughput and latency are reported.
//!
//! The transport is abstracted behind the [`fabric::Fabric`] trait.
//! [`fabric::sim::SimFabric`] is an in-process loopback peer with fault
//! injection; with the `rdmacm` feature, `fabric::rdmacm::CmFabric` drives
//! `librdmacm` and `libibverbs`.
//!
//! # Example
//!
//! ```rust
//! use rdma_client::client;
//! use rdma_client::config::ClientConfig;
//! use rdma_client::fabric::sim::SimFabric;
//!
//! let cfg = ClientConfig {
//!     msg_size: 4096,
//!     ..Default::default()
//! };
//! let fabric = SimFabric::default();
//! let report = client::run(&fabric, &cfg).unwrap();
//! assert!(report.all_same());
//! println!("{}", report);
//! ```

#[macro_use]
mod utils;

#[cfg(feature = "rdmacm")]
mod bindings;

pub mod client;
pub mod config;
pub mod error;
pub mod fabric;

pub use client::{exit_status, run, EndpointState, Session};
pub use config::ClientConfig;
pub use error::ClientError;
