//! MosaicDB session & statement protocol engine
//!
//! The client-facing protocol layer of the Mosaic polystore server: it
//! accepts byte-stream connections, authenticates clients, negotiates a
//! protocol version, and exposes statement execution (ad-hoc, prepared,
//! named, batched), result paging and transaction control as a framed
//! request/response protocol over one persistent connection per client.
//!
//! Wire format: `[4-byte length BE] [MessagePack payload]` in both
//! directions; payloads are tagged request/response shapes (see [`wire`]).
//!
//! Query planning/execution, the catalog and authentication are external
//! collaborators injected behind the traits in [`processor`] and
//! [`catalog`]; this crate owns sessions, statement lifetimes, cursors,
//! transactions and the per-connection message pump.

pub mod catalog;
pub mod config;
pub mod error;
pub mod params;
pub mod processor;
pub mod pump;
pub mod server;
pub mod session;
pub mod statement;
pub mod transaction;
pub mod transport;
pub mod wire;

pub use catalog::{CatalogReader, MetadataFacade};
pub use config::ServerConfig;
pub use error::{Result, ServerError};
pub use processor::{
    AuthenticatedUser, Authenticator, ExecutionOutcome, QueryProcessor, ResultCursor,
    TransactionHandle,
};
pub use server::Server;
pub use session::{Client, ClientManager};
pub use statement::StatementManager;
pub use wire::{Frame, Request, Response, Signature, Value};
