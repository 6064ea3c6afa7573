/*
 * session.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Postino, a command-line SMTP mailer.
 *
 * Postino is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Postino is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Postino.  If not, see <http://www.gnu.org/licenses/>.
 */

//! SMTP session engine: connect with retries, EHLO, STARTTLS, AUTH LOGIN,
//! MAIL FROM, RCPT TO, DATA, QUIT. Protocol steps are free functions
//! generic over the stream so tests can drive them with in-memory pipes.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::net::{PlainStream, SmtpStream};
use crate::observer::Observer;
use crate::smtp::{SessionConfig, SmtpError, SmtpResult, TextEncoding};

/// Read one CRLF-terminated response line, byte by byte. Fragmented
/// delivery is reassembled before the status code is inspected; a read
/// timeout is retried up to the budget before the server is declared
/// unavailable.
async fn read_line<S>(stream: &mut S, config: &SessionConfig) -> SmtpResult<String>
where
    S: AsyncRead + Unpin,
{
    let mut buf: Vec<u8> = Vec::new();
    let mut timeouts = 0;
    while buf.len() < 2 || buf[buf.len() - 2..] != *b"\r\n" {
        let mut b = [0u8; 1];
        match timeout(config.timeout, stream.read(&mut b)).await {
            Ok(Ok(0)) => {
                return Err(SmtpError::ServerUnavailable(
                    "connection closed by server".to_string(),
                ))
            }
            Ok(Ok(_)) => buf.push(b[0]),
            Ok(Err(e)) => return Err(SmtpError::ServerUnavailable(e.to_string())),
            Err(_) => {
                timeouts += 1;
                if timeouts >= config.retries {
                    return Err(SmtpError::ServerUnavailable(format!(
                        "no response after {} read attempts",
                        config.retries
                    )));
                }
            }
        }
    }
    buf.truncate(buf.len() - 2);
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Write a line and CRLF, then flush. Writes block at most the
/// per-operation timeout, same as reads; a peer that accepts the
/// connection but stops reading is declared unavailable.
async fn write_line<S>(stream: &mut S, config: &SessionConfig, line: &[u8]) -> SmtpResult<()>
where
    S: AsyncWrite + Unpin,
{
    let written = async {
        stream.write_all(line).await?;
        stream.write_all(b"\r\n").await?;
        stream.flush().await
    };
    match timeout(config.timeout, written).await {
        Ok(r) => r.map_err(|e| SmtpError::ServerUnavailable(e.to_string())),
        Err(_) => Err(SmtpError::ServerUnavailable("write timed out".to_string())),
    }
}

/// Numeric status code at the start of a response line, if present.
fn status_code(line: &str) -> Option<u16> {
    line.get(..3)?.parse().ok()
}

/// Send one command and require a single-line response with `expected`.
/// `shown` is what the observer sees (credentials are redacted).
async fn exchange<S>(
    stream: &mut S,
    config: &SessionConfig,
    observer: &dyn Observer,
    line: &str,
    shown: &str,
    expected: u16,
) -> SmtpResult<String>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    observer.command(shown);
    write_line(stream, config, line.as_bytes()).await?;
    let response = read_line(stream, config).await?;
    observer.response(&response);
    match status_code(&response) {
        Some(code) if code == expected => Ok(response),
        _ => Err(SmtpError::Protocol(response)),
    }
}

/// EHLO; the first logical response read on the connection is the
/// server's 220 greeting banner.
async fn greet_on<S>(
    stream: &mut S,
    config: &SessionConfig,
    observer: &dyn Observer,
) -> SmtpResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    exchange(stream, config, observer, "EHLO localhost", "EHLO localhost", 220)
        .await
        .map(|_| ())
}

/// Read the multi-line 250 capability response that follows STARTTLS:
/// `250-` continues, `250` or `250 ` ends it. Returns true when an
/// SMTPUTF8 capability token was advertised on any line. A line with any
/// other code aborts the upgrade.
async fn read_starttls_caps<S>(
    stream: &mut S,
    config: &SessionConfig,
    observer: &dyn Observer,
) -> SmtpResult<bool>
where
    S: AsyncRead + Unpin,
{
    let mut utf8 = false;
    loop {
        let line = read_line(stream, config).await?;
        observer.response(&line);
        if !line.starts_with("250") {
            return Err(SmtpError::Protocol(line));
        }
        if line.to_uppercase().contains("SMTPUTF8") {
            utf8 = true;
        }
        if line.as_bytes().get(3) != Some(&b'-') {
            return Ok(utf8);
        }
    }
}

/// STARTTLS negotiation up to (not including) the TLS handshake: send the
/// command, scan capability lines, then require the fresh 220 greeting.
async fn negotiate_starttls<S>(
    stream: &mut S,
    config: &SessionConfig,
    observer: &dyn Observer,
) -> SmtpResult<bool>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    observer.command("STARTTLS");
    write_line(stream, config, b"STARTTLS").await?;
    let utf8 = read_starttls_caps(stream, config, observer).await?;
    let greeting = read_line(stream, config).await?;
    observer.response(&greeting);
    if !greeting.starts_with("220") {
        return Err(SmtpError::Protocol(greeting));
    }
    Ok(utf8)
}

/// AUTH LOGIN: 334, base64 login, 334, base64 password, 235.
async fn auth_login<S>(
    stream: &mut S,
    config: &SessionConfig,
    observer: &dyn Observer,
    login: &str,
    password: &str,
) -> SmtpResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    exchange(stream, config, observer, "AUTH LOGIN", "AUTH LOGIN", 334).await?;
    let login_b64 = BASE64.encode(login.as_bytes());
    exchange(stream, config, observer, &login_b64, "<login>", 334).await?;
    let password_b64 = BASE64.encode(password.as_bytes());
    exchange(stream, config, observer, &password_b64, "<password>", 235).await?;
    Ok(())
}

/// DATA, literal body, lone dot terminator, final 250. The body must
/// already be dot-escaped by the message builder: a line consisting solely
/// of `.` would end the transfer early, and the engine sends the payload
/// verbatim.
async fn send_data<S>(
    stream: &mut S,
    config: &SessionConfig,
    observer: &dyn Observer,
    body: &str,
) -> SmtpResult<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    exchange(stream, config, observer, "DATA", "DATA", 354).await?;
    let written = async {
        stream.write_all(body.as_bytes()).await?;
        if !body.ends_with("\r\n") {
            stream.write_all(b"\r\n").await?;
        }
        stream.write_all(b".\r\n").await?;
        stream.flush().await
    };
    match timeout(config.timeout, written).await {
        Ok(r) => r.map_err(|e| SmtpError::ServerUnavailable(e.to_string()))?,
        Err(_) => return Err(SmtpError::ServerUnavailable("write timed out".to_string())),
    }
    observer.command(".");
    let response = read_line(stream, config).await?;
    observer.response(&response);
    match status_code(&response) {
        Some(250) => Ok(()),
        _ => Err(SmtpError::Protocol(response)),
    }
}

/// One SMTP conversation. Created by `connect`, destroyed by `disconnect`
/// or by dropping on a fatal error (the socket is simply abandoned; no
/// server-side rollback is attempted). Operations must be called in
/// protocol order; any failure aborts the sequence.
pub struct SmtpSession {
    stream: Option<SmtpStream>,
    host: String,
    config: SessionConfig,
    encoding: TextEncoding,
    observer: Arc<dyn Observer>,
}

impl SmtpSession {
    /// Open the TCP connection: per-attempt timeout, up to the retry
    /// budget, no backoff, no retry once connected. Exhausting the budget
    /// means the server is unavailable.
    pub async fn connect(
        host: &str,
        port: u16,
        config: SessionConfig,
        observer: Arc<dyn Observer>,
    ) -> SmtpResult<Self> {
        let mut last = String::new();
        for attempt in 1..=config.retries {
            match timeout(config.timeout, PlainStream::connect(host, port)).await {
                Ok(Ok(stream)) => {
                    observer.info(&format!("connected to {}:{}", host, port));
                    return Ok(Self {
                        stream: Some(SmtpStream::Plain(stream)),
                        host: host.to_string(),
                        config,
                        encoding: TextEncoding::Ascii,
                        observer,
                    });
                }
                Ok(Err(e)) => {
                    last = e.to_string();
                    observer.warning(&format!("connect attempt {} failed: {}", attempt, last));
                }
                Err(_) => {
                    last = "connection timed out".to_string();
                    observer.warning(&format!("connect attempt {} timed out", attempt));
                }
            }
        }
        Err(SmtpError::ServerUnavailable(format!(
            "{}:{}: {}",
            host, port, last
        )))
    }

    /// Encoding negotiated so far (UTF-8 once SMTPUTF8 was advertised).
    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    pub fn is_encrypted(&self) -> bool {
        self.stream.as_ref().is_some_and(SmtpStream::is_encrypted)
    }

    fn live(&mut self) -> SmtpResult<&mut SmtpStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| SmtpError::Transfer("session is closed".to_string()))
    }

    /// Send EHLO and require the 220 greeting.
    pub async fn greet(&mut self) -> SmtpResult<()> {
        let config = self.config;
        let observer = Arc::clone(&self.observer);
        greet_on(self.live()?, &config, &*observer).await
    }

    /// STARTTLS: capability scan (recording SMTPUTF8), fresh 220 greeting,
    /// then the TLS handshake. From here on the session addresses the
    /// ciphertext stream exclusively.
    pub async fn secure(&mut self) -> SmtpResult<()> {
        let config = self.config;
        let observer = Arc::clone(&self.observer);
        let utf8 = negotiate_starttls(self.live()?, &config, &*observer).await?;
        if utf8 {
            self.encoding = TextEncoding::Utf8;
        }
        let plain = match self.stream.take() {
            Some(SmtpStream::Plain(plain)) => plain,
            other => {
                self.stream = other;
                return Err(SmtpError::Transfer(
                    "connection is already encrypted".to_string(),
                ));
            }
        };
        match plain.upgrade_to_tls(&self.host).await {
            Ok(tls) => {
                self.stream = Some(SmtpStream::Tls(tls));
                self.observer.info("connection secured");
                Ok(())
            }
            Err(e) => Err(SmtpError::ServerUnavailable(e.to_string())),
        }
    }

    /// AUTH LOGIN with base64-encoded credentials.
    pub async fn authenticate(&mut self, login: &str, password: &str) -> SmtpResult<()> {
        let config = self.config;
        let observer = Arc::clone(&self.observer);
        auth_login(self.live()?, &config, &*observer, login, password).await
    }

    /// MAIL FROM for this delivery attempt.
    pub async fn set_sender(&mut self, address: &str) -> SmtpResult<()> {
        let config = self.config;
        let observer = Arc::clone(&self.observer);
        let line = format!("MAIL FROM: <{}>", address);
        exchange(self.live()?, &config, &*observer, &line, &line, 250)
            .await
            .map(|_| ())
    }

    /// RCPT TO, once per envelope recipient in supplied order. A rejected
    /// recipient aborts the whole send; the caller decides whether to
    /// retry with a reduced set.
    pub async fn add_recipient(&mut self, address: &str) -> SmtpResult<()> {
        let config = self.config;
        let observer = Arc::clone(&self.observer);
        let line = format!("RCPT TO: <{}>", address);
        exchange(self.live()?, &config, &*observer, &line, &line, 250)
            .await
            .map(|_| ())
    }

    /// Transfer the message body. The text must already be dot-escaped
    /// (see `message::escape_dots`); it is handed to DATA verbatim.
    pub async fn send_body(&mut self, body: &str) -> SmtpResult<()> {
        let config = self.config;
        let observer = Arc::clone(&self.observer);
        send_data(self.live()?, &config, &*observer, body).await
    }

    /// QUIT and close. Best-effort: a missing or failed response is
    /// ignored and the socket is closed unconditionally.
    pub async fn disconnect(mut self) {
        if let Some(mut stream) = self.stream.take() {
            self.observer.command("QUIT");
            let one_try = SessionConfig {
                retries: 1,
                ..self.config
            };
            if write_line(&mut stream, &one_try, b"QUIT").await.is_ok() {
                if let Ok(response) = read_line(&mut stream, &one_try).await {
                    self.observer.response(&response);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::NullObserver;
    use std::time::Duration;
    use tokio::io::duplex;

    fn quick() -> SessionConfig {
        SessionConfig {
            timeout: Duration::from_millis(20),
            retries: 3,
        }
    }

    #[tokio::test]
    async fn read_line_reassembles_fragments() {
        let (mut client, mut server) = duplex(256);
        server.write_all(b"250 go ").await.unwrap();
        server.write_all(b"ah").await.unwrap();
        server.write_all(b"ead\r\n").await.unwrap();
        let line = read_line(&mut client, &quick()).await.unwrap();
        assert_eq!(line, "250 go ahead");
    }

    #[tokio::test]
    async fn read_line_times_out_to_server_unavailable() {
        let (mut client, _server) = duplex(256);
        let err = read_line(&mut client, &quick()).await.unwrap_err();
        assert!(matches!(err, SmtpError::ServerUnavailable(_)));
    }

    #[tokio::test]
    async fn write_times_out_when_peer_stops_reading() {
        // Peer keeps the connection open but never drains its 16-byte
        // window; the write must give up within the timeout instead of
        // blocking forever.
        let (mut client, _server) = duplex(16);
        let line = vec![b'a'; 1024];
        let err = write_line(&mut client, &quick(), &line).await.unwrap_err();
        assert!(matches!(err, SmtpError::ServerUnavailable(_)));
    }

    #[tokio::test]
    async fn body_write_times_out_when_peer_stops_reading() {
        let (mut client, mut server) = duplex(64);
        server.write_all(b"354 end with .\r\n").await.unwrap();
        let body = "a".repeat(1024);
        let err = send_data(&mut client, &quick(), &NullObserver, &body)
            .await
            .unwrap_err();
        assert!(matches!(err, SmtpError::ServerUnavailable(_)));
    }

    #[tokio::test]
    async fn read_line_reports_closed_connection() {
        let (mut client, server) = duplex(256);
        drop(server);
        let err = read_line(&mut client, &quick()).await.unwrap_err();
        assert!(matches!(err, SmtpError::ServerUnavailable(_)));
    }

    #[tokio::test]
    async fn greet_accepts_220_banner() {
        let (mut client, mut server) = duplex(256);
        server.write_all(b"220 mail.example.com\r\n").await.unwrap();
        greet_on(&mut client, &quick(), &NullObserver).await.unwrap();
        let mut sent = [0u8; 16];
        let n = server.read(&mut sent).await.unwrap();
        assert_eq!(&sent[..n], b"EHLO localhost\r\n");
    }

    #[tokio::test]
    async fn greet_rejects_other_codes() {
        let (mut client, mut server) = duplex(256);
        server.write_all(b"554 no service\r\n").await.unwrap();
        let err = greet_on(&mut client, &quick(), &NullObserver)
            .await
            .unwrap_err();
        match err {
            SmtpError::Protocol(raw) => assert_eq!(raw, "554 no service"),
            other => panic!("expected Protocol, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn starttls_negotiation_detects_utf8() {
        let (mut client, mut server) = duplex(256);
        server
            .write_all(b"250-SMTPUTF8\r\n250 go ahead\r\n220 go ahead\r\n")
            .await
            .unwrap();
        let utf8 = negotiate_starttls(&mut client, &quick(), &NullObserver)
            .await
            .unwrap();
        assert!(utf8);
    }

    #[tokio::test]
    async fn starttls_negotiation_without_utf8() {
        let (mut client, mut server) = duplex(256);
        server
            .write_all(b"250-go ahead\r\n250 go ahead\r\n220 go ahead\r\n")
            .await
            .unwrap();
        let utf8 = negotiate_starttls(&mut client, &quick(), &NullObserver)
            .await
            .unwrap();
        assert!(!utf8);
    }

    #[tokio::test]
    async fn starttls_rejects_non_250_line() {
        let (mut client, mut server) = duplex(256);
        server.write_all(b"334 dXNlcg==\r\n").await.unwrap();
        let err = negotiate_starttls(&mut client, &quick(), &NullObserver)
            .await
            .unwrap_err();
        assert!(matches!(err, SmtpError::Protocol(_)));
    }

    #[tokio::test]
    async fn starttls_rejects_missing_fresh_greeting() {
        let (mut client, mut server) = duplex(256);
        server
            .write_all(b"250 go ahead\r\n554 nope\r\n")
            .await
            .unwrap();
        let err = negotiate_starttls(&mut client, &quick(), &NullObserver)
            .await
            .unwrap_err();
        assert!(matches!(err, SmtpError::Protocol(_)));
    }

    #[tokio::test]
    async fn auth_login_exchanges_base64_credentials() {
        let (mut client, mut server) = duplex(1024);
        server
            .write_all(b"334 VXNlcm5hbWU6\r\n334 UGFzc3dvcmQ6\r\n235 ok\r\n")
            .await
            .unwrap();
        auth_login(&mut client, &quick(), &NullObserver, "user", "secret")
            .await
            .unwrap();
        let mut sent = vec![0u8; 128];
        let n = server.read(&mut sent).await.unwrap();
        let wire = String::from_utf8_lossy(&sent[..n]).into_owned();
        assert!(wire.starts_with("AUTH LOGIN\r\n"));
        assert!(wire.contains(&BASE64.encode("user")));
        assert!(wire.contains(&BASE64.encode("secret")));
    }

    #[tokio::test]
    async fn auth_login_fails_on_rejected_password() {
        let (mut client, mut server) = duplex(1024);
        server
            .write_all(b"334 VXNlcm5hbWU6\r\n334 UGFzc3dvcmQ6\r\n535 denied\r\n")
            .await
            .unwrap();
        let err = auth_login(&mut client, &quick(), &NullObserver, "user", "bad")
            .await
            .unwrap_err();
        match err {
            SmtpError::Protocol(raw) => assert_eq!(raw, "535 denied"),
            other => panic!("expected Protocol, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn send_data_terminates_with_lone_dot() {
        let (mut client, mut server) = duplex(1024);
        server.write_all(b"354 end with .\r\n250 ok\r\n").await.unwrap();
        send_data(&mut client, &quick(), &NullObserver, "Hello\r\nWorld")
            .await
            .unwrap();
        let mut sent = vec![0u8; 128];
        let n = server.read(&mut sent).await.unwrap();
        let wire = String::from_utf8_lossy(&sent[..n]).into_owned();
        assert!(wire.ends_with("Hello\r\nWorld\r\n.\r\n"));
    }

    #[tokio::test]
    async fn send_data_fails_when_data_not_accepted() {
        let (mut client, mut server) = duplex(1024);
        server.write_all(b"550 no\r\n").await.unwrap();
        let err = send_data(&mut client, &quick(), &NullObserver, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, SmtpError::Protocol(_)));
    }
}
