//! Client driver for columnar SQL database servers speaking the MAPI wire
//! protocol: frame codec, challenge/response auth, a textual result parser,
//! server-side prepared statements, transactions, and a connection pool.

pub mod error;
mod opts;
pub mod pool;
pub mod prepared;
pub mod protocol;
pub mod transaction;
mod connection;

pub use connection::Connection;
pub use error::{Error, Result};
pub use opts::PoolConfig;
pub use pool::{Pool, PooledConnection};
pub use prepared::PreparedStatement;
pub use protocol::value::{ColumnType, ParamType, TemporalKind, Value};
pub use protocol::result::QueryResult;
pub use transaction::{Transaction, TxError, TxOutcome};
