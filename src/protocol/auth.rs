//! Challenge/response authentication, including proxy and redirect handling.

use ripemd::Ripemd160;
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};

use crate::error::{Error, Result};
use crate::protocol::frame::Framer;

const MAX_AUTH_ITERATIONS: usize = 10;

/// A parsed `salt:server_type:9:auth_types:endian:hash_algo:` challenge.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub salt: String,
    pub server_type: String,
    pub auth_types: Vec<String>,
    pub endian: String,
    pub hash_algo: String,
}

pub fn parse_challenge(line: &str) -> Result<Challenge> {
    let line = line.trim_end_matches(['\n', '\r']);
    let fields: Vec<&str> = line.split(':').collect();
    if fields.len() < 6 {
        return Err(Error::driver(format!("malformed challenge: {line}")));
    }

    let version = fields[2];
    if version != "9" {
        return Err(Error::driver(format!(
            "unsupported MAPI protocol version: {version}"
        )));
    }

    let auth_types = fields[3]
        .split(',')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();

    Ok(Challenge {
        salt: fields[0].to_string(),
        server_type: fields[1].to_string(),
        auth_types,
        endian: fields[4].to_string(),
        hash_algo: fields[5].to_string(),
    })
}

/// The hash the client uses to protect `password_digest || salt` on the
/// wire. Preference order is fixed by the protocol: strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthHash {
    Sha512,
    Sha256,
    Sha224,
    Ripemd160,
}

impl AuthHash {
    const PREFERENCE: [(&'static str, AuthHash); 4] = [
        ("SHA512", AuthHash::Sha512),
        ("SHA256", AuthHash::Sha256),
        ("SHA224", AuthHash::Sha224),
        ("RIPEMD160", AuthHash::Ripemd160),
    ];

    fn select(available: &[String]) -> Result<Self> {
        for (name, hash) in Self::PREFERENCE {
            if available.iter().any(|a| a == name) {
                return Ok(hash);
            }
        }
        Err(Error::driver(format!(
            "server offered no supported auth hash: {available:?}"
        )))
    }

    /// The literal tag, e.g. `{SHA256}`, prepended to the digest on the wire.
    fn tag(self) -> &'static str {
        match self {
            AuthHash::Sha512 => "{SHA512}",
            AuthHash::Sha256 => "{SHA256}",
            AuthHash::Sha224 => "{SHA224}",
            AuthHash::Ripemd160 => "{RIPEMD160}",
        }
    }

    fn digest_hex(self, input: &[u8]) -> String {
        match self {
            AuthHash::Sha512 => hex::encode(Sha512::digest(input)),
            AuthHash::Sha256 => hex::encode(Sha256::digest(input)),
            AuthHash::Sha224 => hex::encode(Sha224::digest(input)),
            AuthHash::Ripemd160 => hex::encode(Ripemd160::digest(input)),
        }
    }
}

/// The hash the server asked be applied to the bare password before it is
/// mixed with the salt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PasswordHash {
    Sha512,
    Sha384,
    Sha256,
    Sha224,
}

impl PasswordHash {
    fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "SHA512" => PasswordHash::Sha512,
            "SHA384" => PasswordHash::Sha384,
            "SHA256" => PasswordHash::Sha256,
            "SHA224" => PasswordHash::Sha224,
            other => return Err(Error::driver(format!("unsupported password hash: {other}"))),
        })
    }

    fn digest_hex(self, input: &[u8]) -> String {
        match self {
            PasswordHash::Sha512 => hex::encode(Sha512::digest(input)),
            PasswordHash::Sha384 => hex::encode(Sha384::digest(input)),
            PasswordHash::Sha256 => hex::encode(Sha256::digest(input)),
            PasswordHash::Sha224 => hex::encode(Sha224::digest(input)),
        }
    }
}

/// Builds the `LIT:<username>:<auth_name><final>:sql:<database>:` response
/// line for a given challenge.
fn build_response(
    username: &str,
    password: &str,
    database: &str,
    challenge: &Challenge,
) -> Result<String> {
    let auth_hash = AuthHash::select(&challenge.auth_types)?;
    let password_hash = PasswordHash::from_name(&challenge.hash_algo)?;

    let password_digest = password_hash.digest_hex(password.as_bytes());
    let mut preimage = password_digest.into_bytes();
    preimage.extend_from_slice(challenge.salt.as_bytes());
    let final_digest = auth_hash.digest_hex(&preimage);

    Ok(format!(
        "LIT:{username}:{}{final_digest}:sql:{database}:",
        auth_hash.tag(),
    ))
}

/// What the driver should do after the server has answered the auth
/// response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    Redirect {
        host: String,
        port: u16,
        database: String,
    },
}

enum ReplyDisposition {
    Authenticated,
    Proxy,
    Redirect { host: String, port: u16, database: String },
}

fn interpret_reply(reply: &str) -> Result<ReplyDisposition> {
    let reply = reply.trim_end_matches(['\n', '\r']);

    if reply.is_empty() {
        return Ok(ReplyDisposition::Authenticated);
    }
    if reply.starts_with("^mapi:merovingian:") {
        return Ok(ReplyDisposition::Proxy);
    }
    if let Some(uri) = reply.strip_prefix("^mapi:") {
        let (host, port, database) = parse_redirect(uri)?;
        return Ok(ReplyDisposition::Redirect { host, port, database });
    }

    Err(Error::driver(format!("unexpected challenge reply: {reply}")))
}

fn parse_redirect(uri: &str) -> Result<(String, u16, String)> {
    let rest = uri
        .strip_prefix("monetdb://")
        .ok_or_else(|| Error::driver(format!("unrecognised redirect uri: {uri}")))?;
    let (host_port, path) = rest
        .split_once('/')
        .ok_or_else(|| Error::driver(format!("redirect uri missing path: {uri}")))?;
    let (host, port_str) = host_port
        .split_once(':')
        .ok_or_else(|| Error::driver(format!("redirect uri missing port: {uri}")))?;
    let port: u16 = port_str
        .parse()
        .map_err(|_| Error::driver(format!("invalid redirect port: {port_str}")))?;

    Ok((host.to_string(), port, path.trim_end_matches('/').to_string()))
}

/// Runs the full challenge/response handshake over an already-connected
/// `Framer`, following proxy replies on the same socket up to
/// [`MAX_AUTH_ITERATIONS`] times.
pub fn authenticate(
    framer: &mut Framer,
    username: &str,
    password: &str,
    database: &str,
) -> Result<AuthOutcome> {
    for _ in 0..MAX_AUTH_ITERATIONS {
        let challenge_bytes = framer.receive()?;
        let challenge_line = String::from_utf8_lossy(&challenge_bytes);
        let challenge = parse_challenge(&challenge_line)?;

        let response = build_response(username, password, database, &challenge)?;
        framer.send_text(&response)?;

        let reply_bytes = framer.receive()?;
        let reply = String::from_utf8_lossy(&reply_bytes);

        match interpret_reply(&reply)? {
            ReplyDisposition::Authenticated => return Ok(AuthOutcome::Authenticated),
            ReplyDisposition::Redirect { host, port, database } => {
                return Ok(AuthOutcome::Redirect { host, port, database })
            }
            ReplyDisposition::Proxy => {
                tracing::warn!("proxy loop iterated; re-authenticating on same socket");
                continue;
            }
        }
    }

    tracing::error!("exceeded {MAX_AUTH_ITERATIONS} proxy iterations during authentication");
    Err(Error::driver("too many proxy iterations"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_challenge() {
        let challenge =
            parse_challenge("oRzY7XZr1EfNWETqU6b2:merovingian:9:SHA256,RIPEMD160:BIG:SHA512:")
                .expect("parse");
        assert_eq!(challenge.salt, "oRzY7XZr1EfNWETqU6b2");
        assert_eq!(challenge.server_type, "merovingian");
        assert_eq!(challenge.auth_types, vec!["SHA256", "RIPEMD160"]);
        assert_eq!(challenge.endian, "BIG");
        assert_eq!(challenge.hash_algo, "SHA512");
    }

    #[test]
    fn rejects_unsupported_protocol_version() {
        let err = parse_challenge("salt:merovingian:8:SHA256:BIG:SHA512:").unwrap_err();
        assert!(matches!(err, Error::Driver { .. }));
    }

    #[test]
    fn auth_digest_golden_vector() {
        let challenge = Challenge {
            salt: "oRzY7XZr1EfNWETqU6b2".to_string(),
            server_type: "merovingian".to_string(),
            auth_types: vec!["SHA256".to_string(), "RIPEMD160".to_string()],
            endian: "BIG".to_string(),
            hash_algo: "SHA512".to_string(),
        };

        let response = build_response("leto", "atreides", "dune", &challenge).expect("response");
        assert_eq!(
            response,
            "LIT:leto:{SHA256}9f133d2ccda31b36cb9c4a848cf4332635d353b5c8c0fee341a8c90ffcc38127:sql:dune:"
        );
    }

    #[test]
    fn redirect_reply_parses_host_port_database() {
        let disposition =
            interpret_reply("^mapi:monetdb://caladan.dune.local:50001/dune_db\n").expect("parse");
        match disposition {
            ReplyDisposition::Redirect { host, port, database } => {
                assert_eq!(host, "caladan.dune.local");
                assert_eq!(port, 50001);
                assert_eq!(database, "dune_db");
            }
            _ => panic!("expected redirect"),
        }
    }

    #[test]
    fn proxy_reply_is_recognised() {
        let disposition = interpret_reply("^mapi:merovingian://nexus\n").expect("parse");
        assert!(matches!(disposition, ReplyDisposition::Proxy));
    }

    #[test]
    fn empty_reply_is_authenticated() {
        let disposition = interpret_reply("").expect("parse");
        assert!(matches!(disposition, ReplyDisposition::Authenticated));
    }

    #[test]
    fn unexpected_reply_is_driver_error() {
        let err = interpret_reply("garbage").unwrap_err();
        assert!(matches!(err, Error::Driver { .. }));
    }
}
