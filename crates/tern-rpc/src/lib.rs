//! # tern-rpc
//!
//! A small call dispatcher on top of the tern codecs.
//!
//! - **Client** - issues typed calls and matches responses to waiting callers
//! - **Server** - routes requests to registered async handlers
//!
//! ```no_run
//! use std::sync::Arc;
//! use tern_rpc::{Options, TcpClient, TcpServer};
//! use tokio::net::TcpListener;
//!
//! # async fn run() -> Result<(), tern_rpc::RpcError> {
//! let server = Arc::new(TcpServer::new());
//! server.register("Echo.Say", |text: String| async move { Ok::<_, String>(text) });
//!
//! let listener = TcpListener::bind("127.0.0.1:9000").await?;
//! tokio::spawn(server.serve(listener, Options::default()));
//!
//! let client = TcpClient::connect("127.0.0.1:9000", Options::default()).await?;
//! let reply: String = client.call("Echo.Say", "hi").await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
pub mod options;
pub mod server;

pub use client::{Client, TcpClient};
pub use error::RpcError;
pub use options::Options;
pub use server::{ConnectionHook, Server, TcpServer};
