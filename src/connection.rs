//! Owns one socket: connect/auth/session-configure, simple and prepared
//! queries, and transaction orchestration.

use std::net::{TcpStream, ToSocketAddrs};

use crate::error::{Error, Result};
use crate::opts::PoolConfig;
use crate::prepared::PreparedStatement;
use crate::protocol::auth::{self, AuthOutcome};
use crate::protocol::frame::Framer;
use crate::protocol::result::{self, QueryResult};
use crate::protocol::value::Value;
use crate::transaction::{self, Transaction, TxError, TxOutcome};

const MAX_REDIRECTS: u32 = 10;

/// One authenticated, session-configured MAPI socket.
///
/// Checkout is exclusive (see [`crate::Pool`]): once a caller holds a
/// `&mut Connection`, it is the only task reading or writing its socket.
pub struct Connection {
    framer: Framer,
    pool_name: String,
    poisoned: bool,
}

impl Connection {
    /// Connects, authenticates (following redirects) and configures the
    /// session exactly as described for `Connection::Connect`.
    pub fn connect(config: &PoolConfig) -> Result<Self> {
        Self::connect_to(config, config.host.clone(), config.port, config.database.clone(), 0)
    }

    fn connect_to(config: &PoolConfig, host: String, port: u16, database: String, depth: u32) -> Result<Self> {
        if depth > MAX_REDIRECTS {
            return Err(Error::driver("too many redirects"));
        }

        let address = format!("{host}:{port}");
        let socket_addr = address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| Error::network(format!("could not resolve {address}")))?;

        let stream = TcpStream::connect_timeout(&socket_addr, config.connect_timeout)?;
        let mut framer = Framer::new(stream);
        framer.set_timeouts(config.read_timeout, config.send_timeout)?;

        match auth::authenticate(&mut framer, &config.username, &config.password, &database)? {
            AuthOutcome::Authenticated => {
                tracing::debug!(%host, port, %database, "connection established");
            }
            AuthOutcome::Redirect { host: new_host, port: new_port, database: new_database } => {
                tracing::warn!(%new_host, new_port, "following MAPI redirect");
                drop(framer);
                return Self::connect_to(config, new_host, new_port, new_database, depth + 1);
            }
        }

        Self::configure_session(&mut framer, config)?;
        tracing::debug!(pool = %config.name, "session configured");

        Ok(Self {
            framer,
            pool_name: config.name.clone(),
            poisoned: false,
        })
    }

    fn configure_session(framer: &mut Framer, config: &PoolConfig) -> Result<()> {
        framer.send_text(&format!("set time zone interval '{}' minute", config.time_zone_offset))?;
        result::parse(&framer.receive()?)?;

        framer.send_command("reply_size -1")?;
        let reply = framer.receive()?;
        if !reply.is_empty() {
            return Err(Error::driver("unexpected reply to reply_size control command"));
        }

        if let Some(schema) = &config.schema {
            framer.send_text(&format!("set schema {schema}"))?;
            result::parse(&framer.receive()?)?;
        }

        if let Some(role) = &config.role {
            framer.send_text(&format!("set role {role}"))?;
            result::parse(&framer.receive()?)?;
        }

        Ok(())
    }

    pub fn pool_name(&self) -> &str {
        &self.pool_name
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub(crate) fn poison(&mut self) {
        self.poisoned = true;
    }

    pub(crate) fn framer_mut(&mut self) -> &mut Framer {
        &mut self.framer
    }

    /// Simple query path: no parameters, a single `s<sql>;` round trip.
    pub fn query(&mut self, sql: &str) -> Result<QueryResult> {
        let result = (|| {
            self.framer.send_query(sql)?;
            result::parse(&self.framer.receive()?)
        })();

        if let Err(err) = &result {
            if err.is_connection_fatal() {
                self.poison();
            }
        }
        result
    }

    /// Parameterised query path: prepare, exec, deallocate. A failed
    /// deallocate that is not the benign "unknown statement" case closes
    /// the connection, matching the "don't leak server-side statements"
    /// rule; the original exec outcome is still what callers see unless the
    /// deallocate itself failed with a connection-fatal error.
    pub fn query_with_args(&mut self, sql: &str, args: &[Value]) -> Result<QueryResult> {
        let result = (|| {
            let stmt = PreparedStatement::new(&mut self.framer, sql)?;
            let exec_result = stmt.exec(&mut self.framer, args);

            match stmt.close(&mut self.framer) {
                Ok(()) => exec_result,
                Err(close_err) if close_err.is_connection_fatal() => Err(close_err),
                Err(_non_fatal_close_err) => {
                    self.poisoned = true;
                    exec_result
                }
            }
        })();

        if let Err(err) = &result {
            if err.is_connection_fatal() {
                self.poison();
            }
        }
        result
    }

    /// Runs `body` inside `start transaction` / `commit` or `rollback`,
    /// deallocating every statement the body prepared regardless of outcome.
    pub fn transaction<T, R>(
        &mut self,
        body: impl FnOnce(&mut Transaction) -> Result<TxOutcome<T, R>>,
    ) -> std::result::Result<T, TxError<R>> {
        transaction::run(self, body)
    }
}
