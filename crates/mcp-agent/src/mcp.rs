//! Client side of the Model Context Protocol, just enough of it to discover
//! and call tools on remote servers over the streamable HTTP transport.
//!
//! - [`protocol`]: tool descriptors and call results
//! - [`connection`]: the [`connection::ToolServer`] seam the registry dispatches through
//! - [`auth`]: authorization header providers
//! - [`config`]: turning configured server lists into connections
pub mod auth;
pub mod config;
pub mod connection;
pub mod protocol;
