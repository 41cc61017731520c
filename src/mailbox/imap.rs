//! IMAP email source: raw IMAP commands over rustls.
//!
//! One call to [`ImapSource::receive`] opens a session, logs in, selects
//! the configured mailbox, fetches every UNSEEN message as RFC822, and logs
//! out. The socket work is blocking and runs on tokio's blocking pool.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tracing::{debug, info, warn};

use crate::config::MailboxConfig;
use crate::error::MailError;
use crate::mailbox::parse::parse_fetched;
use crate::mailbox::{EmailSource, FetchedEmail};

const READ_TIMEOUT: Duration = Duration::from_secs(30);
/// Largest message literal accepted from the server.
const MAX_LITERAL_BYTES: usize = 50 * 1024 * 1024;
/// Longest response line accepted before CRLF.
const MAX_LINE_BYTES: usize = 64 * 1024;

pub struct ImapSource {
    config: Arc<MailboxConfig>,
}

impl ImapSource {
    pub fn new(config: Arc<MailboxConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl EmailSource for ImapSource {
    async fn receive(&self) -> Result<Vec<FetchedEmail>, MailError> {
        let config = Arc::clone(&self.config);
        let raw_messages = tokio::task::spawn_blocking(move || fetch_unseen(&config))
            .await
            .map_err(|e| MailError::Protocol(format!("IMAP fetch task panicked: {e}")))??;

        Ok(parse_unique(raw_messages))
    }
}

/// Parse raw messages, dropping unparsable ones and repeated hashes.
pub fn parse_unique(raw_messages: Vec<Vec<u8>>) -> Vec<FetchedEmail> {
    let mut seen = HashSet::new();
    let mut emails = Vec::with_capacity(raw_messages.len());

    for raw in raw_messages {
        let Some(fetched) = parse_fetched(&raw) else {
            warn!(bytes = raw.len(), "Skipping unparsable message");
            continue;
        };
        if !seen.insert(fetched.hash.clone()) {
            debug!(hash = %fetched.hash, "Dropping duplicate message within batch");
            continue;
        }
        emails.push(fetched);
    }

    emails
}

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// Connect over TLS and fetch all unseen messages (blocking).
fn fetch_unseen(config: &MailboxConfig) -> Result<Vec<Vec<u8>>, MailError> {
    let stream = connect_tls(config)?;
    let mut session = ImapSession::new(stream);
    let messages = session.fetch_unseen(config)?;
    info!(
        host = %config.imap_host,
        mailbox = %config.mailbox,
        count = messages.len(),
        "Fetched unseen emails"
    );
    Ok(messages)
}

fn connect_tls(config: &MailboxConfig) -> Result<TlsStream, MailError> {
    let tcp = TcpStream::connect((config.imap_host.as_str(), config.imap_port)).map_err(|e| {
        MailError::Connect {
            host: format!("{}:{}", config.imap_host, config.imap_port),
            reason: e.to_string(),
        }
    })?;
    tcp.set_read_timeout(Some(READ_TIMEOUT))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = ServerName::try_from(config.imap_host.clone())
        .map_err(|e| MailError::Tls(format!("invalid server name: {e}")))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| MailError::Tls(e.to_string()))?;

    Ok(rustls::StreamOwned::new(conn, tcp))
}

/// The untagged data and final status of one tagged command.
#[derive(Debug, Default)]
struct Response {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
    status: String,
}

impl Response {
    fn is_ok(&self) -> bool {
        self.status.split_whitespace().nth(1) == Some("OK")
    }
}

/// Minimal IMAP4rev1 client over any byte stream.
struct ImapSession<S: Read + Write> {
    stream: S,
    tag_counter: u32,
}

impl<S: Read + Write> ImapSession<S> {
    fn new(stream: S) -> Self {
        Self {
            stream,
            tag_counter: 0,
        }
    }

    fn fetch_unseen(&mut self, config: &MailboxConfig) -> Result<Vec<Vec<u8>>, MailError> {
        let greeting = self.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(MailError::Protocol(format!(
                "unexpected greeting: {}",
                greeting.trim_end()
            )));
        }

        let login = self.command(&format!(
            "LOGIN {} {}",
            quote(&config.username),
            quote(config.password.expose_secret())
        ))?;
        if !login.is_ok() {
            return Err(MailError::AuthFailed {
                username: config.username.clone(),
            });
        }

        let select = self.command(&format!("SELECT {}", quote(&config.mailbox)))?;
        if !select.is_ok() {
            return Err(MailError::Protocol(format!(
                "SELECT {} failed: {}",
                config.mailbox,
                select.status.trim_end()
            )));
        }

        let search = self.command("SEARCH UNSEEN")?;
        if !search.is_ok() {
            return Err(MailError::Protocol(format!(
                "SEARCH failed: {}",
                search.status.trim_end()
            )));
        }
        let ids = parse_search(&search.lines);
        debug!(count = ids.len(), "Unseen messages found");

        let mut messages = Vec::with_capacity(ids.len());
        for id in &ids {
            let mut fetch = self.command(&format!("FETCH {id} RFC822"))?;
            if !fetch.is_ok() {
                warn!(id = %id, status = %fetch.status.trim_end(), "FETCH failed, skipping");
                continue;
            }
            match fetch.literals.drain(..).next() {
                Some(raw) => messages.push(raw),
                None => warn!(id = %id, "FETCH returned no message body"),
            }
        }

        if let Err(e) = self.command("LOGOUT") {
            debug!("LOGOUT failed: {e}");
        }

        Ok(messages)
    }

    fn next_tag(&mut self) -> String {
        self.tag_counter += 1;
        format!("A{}", self.tag_counter)
    }

    /// Send a command and collect everything up to its tagged status line.
    fn command(&mut self, cmd: &str) -> Result<Response, MailError> {
        let tag = self.next_tag();
        self.stream
            .write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        self.stream.flush()?;

        let mut response = Response::default();
        let tag_prefix = format!("{tag} ");
        loop {
            let line = self.read_line()?;
            if let Some(len) = literal_len(&line) {
                let literal = self.read_exact(len)?;
                response.literals.push(literal);
                response.lines.push(line);
                continue;
            }
            if line.starts_with(&tag_prefix) {
                response.status = line;
                return Ok(response);
            }
            response.lines.push(line);
        }
    }

    fn read_line(&mut self) -> Result<String, MailError> {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match self.stream.read(&mut byte)? {
                0 => return Err(MailError::Protocol("IMAP connection closed".into())),
                _ => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).into_owned());
                    }
                    if buf.len() >= MAX_LINE_BYTES {
                        return Err(MailError::Protocol(format!(
                            "response line exceeds {MAX_LINE_BYTES} bytes"
                        )));
                    }
                }
            }
        }
    }

    fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, MailError> {
        if len > MAX_LITERAL_BYTES {
            return Err(MailError::Protocol(format!(
                "literal of {len} bytes exceeds {MAX_LITERAL_BYTES}"
            )));
        }
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf)?;
        Ok(buf)
    }
}

/// If `line` announces a literal (`... {123}\r\n`), return its byte length.
fn literal_len(line: &str) -> Option<usize> {
    let trimmed = line.trim_end_matches("\r\n");
    let inner = trimmed.strip_suffix('}')?;
    let open = inner.rfind('{')?;
    inner[open + 1..].parse().ok()
}

/// Collect message numbers from `* SEARCH ...` lines.
fn parse_search(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter_map(|line| line.strip_prefix("* SEARCH"))
        .flat_map(|rest| rest.split_whitespace())
        .filter(|id| id.bytes().all(|b| b.is_ascii_digit()))
        .map(str::to_string)
        .collect()
}

/// Quote a string as an IMAP quoted string.
fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}
