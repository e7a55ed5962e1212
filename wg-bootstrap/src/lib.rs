// WireGuard one-time bootstrap library
// Shared modules for the daemon and tests

#![warn(missing_docs)]

//! WireGuard One-Time Bootstrap Library
//!
//! This library serves a generated WireGuard peer config exactly once over
//! HTTP (as a QR code and as text), and keeps the hosting machine awake while
//! a VPN client is inferred to be connected.
//!
//! # Main Components
//!
//! - [`config`]: Command line / environment parsing and validation
//! - [`endpoint`]: Endpoint normalization of the served config
//! - [`gate`]: One-time bootstrap state machine
//! - [`handshake`]: WireGuard handshake polling and activity samples
//! - [`keepalive`]: Keep-alive pings to the wake endpoint
//! - [`monitor`]: Session inference and keep-alive loop
//! - [`page`]: HTML rendering of the one-time page
//! - [`qr`]: QR encoding of the config
//! - [`server`]: HTTP routes
//! - [`store`]: Peer config and completion marker on disk
//! - [`types`]: Shared configuration structures

pub mod config;
pub mod endpoint;
pub mod gate;
pub mod handshake;
pub mod keepalive;
pub mod monitor;
pub mod page;
pub mod qr;
pub mod server;
pub mod store;
pub mod types;
