// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! SSH remote execution over libssh2.
//!
//! `connect()` opens one authenticated [`ssh2::Session`]. Command sequences
//! run as `bash -s` on a fresh channel with the script on stdin, and files
//! move over SFTP. libssh2 is blocking, so every call runs on the blocking
//! thread pool.

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use ssh2::Session;
use tracing::{debug, info};

use super::{ExecOutput, RemoteConnector, RemoteError, RemoteSession, Result};

const DEFAULT_SSH_PORT: u16 = 22;

/// Where to connect and as whom, parsed from `[user@]host[:port]`.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Target {
    user: Option<String>,
    host: String,
    port: u16,
}

impl Target {
    fn parse(spec: &str) -> Self {
        let (user, rest) = match spec.split_once('@') {
            Some((user, rest)) if !user.is_empty() => (Some(user.to_string()), rest),
            Some((_, rest)) => (None, rest),
            None => (None, spec),
        };

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => match port.parse::<u16>() {
                Ok(port) => (host, port),
                Err(_) => (rest, DEFAULT_SSH_PORT),
            },
            None => (rest, DEFAULT_SSH_PORT),
        };

        Self {
            user,
            host: host.to_string(),
            port,
        }
    }

    fn username(&self) -> Option<String> {
        self.user
            .clone()
            .or_else(|| std::env::var("USER").ok().filter(|u| !u.is_empty()))
    }
}

/// Connector for a host reachable over SSH.
///
/// The host is given as `[user@]host[:port]`; without a user the local
/// `$USER` is used. With an identity file the session authenticates with
/// that key, otherwise through the running SSH agent.
#[derive(Debug, Clone)]
pub struct SshConnector {
    host: String,
    target: Target,
    identity: Option<PathBuf>,
    connect_timeout: Duration,
}

impl SshConnector {
    /// Create a connector for `host`, optionally with an identity file.
    pub fn new(host: impl Into<String>, identity: Option<PathBuf>) -> Self {
        let host = host.into();
        Self {
            target: Target::parse(&host),
            host,
            identity,
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Set the SSH connect timeout.
    ///
    /// Default: 30 seconds
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Open and authenticate a session. Blocking.
fn open_session(
    target: &Target,
    identity: Option<&Path>,
    connect_timeout: Duration,
) -> std::result::Result<Session, String> {
    let addr = (target.host.as_str(), target.port)
        .to_socket_addrs()
        .map_err(|e| format!("Failed to resolve {}:{}: {}", target.host, target.port, e))?
        .next()
        .ok_or_else(|| format!("No address for {}:{}", target.host, target.port))?;

    let tcp = TcpStream::connect_timeout(&addr, connect_timeout)
        .map_err(|e| format!("Failed to connect to {}: {}", addr, e))?;

    let mut session = Session::new().map_err(|e| format!("Failed to create SSH session: {}", e))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(u32::try_from(connect_timeout.as_millis()).unwrap_or(u32::MAX));
    session
        .handshake()
        .map_err(|e| format!("SSH handshake failed: {}", e))?;
    // Handshake only; commands may run for a long time
    session.set_timeout(0);

    let username = target
        .username()
        .ok_or_else(|| "No user for SSH authentication".to_string())?;

    match identity {
        Some(identity) => session
            .userauth_pubkey_file(&username, None, identity, None)
            .map_err(|e| format!("Private key authentication failed: {}", e))?,
        None => session
            .userauth_agent(&username)
            .map_err(|e| format!("Agent authentication failed: {}", e))?,
    }

    if !session.authenticated() {
        return Err("SSH authentication failed".to_string());
    }

    Ok(session)
}

#[async_trait]
impl RemoteConnector for SshConnector {
    fn host(&self) -> &str {
        &self.host
    }

    async fn connect(&self) -> Result<Box<dyn RemoteSession>> {
        let target = self.target.clone();
        let identity = self.identity.clone();
        let connect_timeout = self.connect_timeout;

        let session = tokio::task::spawn_blocking(move || {
            open_session(&target, identity.as_deref(), connect_timeout)
        })
        .await
        .map_err(|e| RemoteError::Other(format!("SSH connect task failed: {}", e)))?
        .map_err(|reason| RemoteError::Connect {
            host: self.host.clone(),
            reason,
        })?;

        info!(host = %self.host, "SSH session opened");

        Ok(Box::new(SshSession {
            host: self.host.clone(),
            session: Arc::new(Mutex::new(session)),
        }))
    }
}

/// One authenticated SSH session.
pub struct SshSession {
    host: String,
    session: Arc<Mutex<Session>>,
}

impl SshSession {
    /// Run `f` with the session on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Session) -> Result<T> + Send + 'static,
    {
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || {
            let session = session
                .lock()
                .map_err(|_| RemoteError::Other("SSH session lock poisoned".to_string()))?;
            f(&session)
        })
        .await
        .map_err(|e| RemoteError::Other(format!("SSH task failed: {}", e)))?
    }
}

fn transfer_error(
    operation: &'static str,
    path: &str,
    error: impl std::fmt::Display,
) -> RemoteError {
    RemoteError::Transfer {
        operation,
        path: path.to_string(),
        stderr: error.to_string(),
    }
}

/// Write `content` to `remote_path` over SFTP. Blocking.
fn sftp_write(session: &Session, remote_path: &str, content: &[u8]) -> Result<()> {
    let sftp = session
        .sftp()
        .map_err(|e| transfer_error("upload", remote_path, e))?;
    let mut file = sftp
        .create(Path::new(remote_path))
        .map_err(|e| transfer_error("upload", remote_path, e))?;
    file.write_all(content)
        .map_err(|e| transfer_error("upload", remote_path, e))
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn execute(&self, commands: &[String]) -> Result<ExecOutput> {
        let script = commands.join("\n");
        debug!(host = %self.host, commands = commands.len(), "Executing remote commands");

        self.blocking(move |session| {
            let mut channel = session.channel_session()?;
            channel.exec("bash -s")?;
            channel.write_all(script.as_bytes())?;
            channel.send_eof()?;

            let mut stdout = Vec::new();
            channel.read_to_end(&mut stdout)?;
            let mut stderr = Vec::new();
            channel.stderr().read_to_end(&mut stderr)?;

            channel.wait_close()?;
            let exit_code = channel.exit_status()?;

            Ok(ExecOutput {
                stdout: String::from_utf8_lossy(&stdout).into_owned(),
                stderr: String::from_utf8_lossy(&stderr).into_owned(),
                exit_code,
            })
        })
        .await
    }

    async fn upload_file(&self, local_path: &Path, remote_path: &str) -> Result<()> {
        debug!(local = %local_path.display(), remote_path, "Uploading file");
        let content = tokio::fs::read(local_path).await?;
        let remote_path = remote_path.to_string();
        self.blocking(move |session| sftp_write(session, &remote_path, &content))
            .await
    }

    async fn upload_content(&self, content: &str, remote_path: &str) -> Result<()> {
        debug!(remote_path, bytes = content.len(), "Uploading content");
        let content = content.as_bytes().to_vec();
        let remote_path = remote_path.to_string();
        self.blocking(move |session| sftp_write(session, &remote_path, &content))
            .await
    }

    async fn download_file(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        debug!(remote_path, local = %local_path.display(), "Downloading file");
        let path = remote_path.to_string();
        let content = self
            .blocking(move |session| {
                let sftp = session
                    .sftp()
                    .map_err(|e| transfer_error("download", &path, e))?;
                let mut file = sftp
                    .open(Path::new(&path))
                    .map_err(|e| transfer_error("download", &path, e))?;
                let mut content = Vec::new();
                file.read_to_end(&mut content)
                    .map_err(|e| transfer_error("download", &path, e))?;
                Ok(content)
            })
            .await?;

        tokio::fs::write(local_path, content).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let host = self.host.clone();
        let result = self
            .blocking(|session| Ok(session.disconnect(None, "relval session closed", None)))
            .await?;

        if let Err(e) = result {
            debug!(host = %host, error = %e, "SSH disconnect not clean");
        }
        info!(host = %host, "SSH session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parse_plain_host() {
        let target = Target::parse("lxplus.cern.ch");
        assert_eq!(target.user, None);
        assert_eq!(target.host, "lxplus.cern.ch");
        assert_eq!(target.port, 22);
    }

    #[test]
    fn test_target_parse_user_and_port() {
        let target = Target::parse("pdmvserv@lxplus.cern.ch:2222");
        assert_eq!(target.user.as_deref(), Some("pdmvserv"));
        assert_eq!(target.host, "lxplus.cern.ch");
        assert_eq!(target.port, 2222);
    }

    #[test]
    fn test_target_parse_ignores_bad_port() {
        let target = Target::parse("@host:ssh");
        assert_eq!(target.user, None);
        assert_eq!(target.host, "host:ssh");
        assert_eq!(target.port, 22);
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_error() {
        // Reserve a free port, then release it so nothing listens there
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let connector = SshConnector::new(format!("jdoe@127.0.0.1:{}", port), None)
            .with_connect_timeout(Duration::from_secs(2));
        assert_eq!(connector.host(), format!("jdoe@127.0.0.1:{}", port));

        let result = connector.connect().await;
        match result {
            Err(RemoteError::Connect { host, reason }) => {
                assert_eq!(host, format!("jdoe@127.0.0.1:{}", port));
                assert!(reason.starts_with("Failed to connect"), "{}", reason);
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("connected to a closed port"),
        }
    }

    #[tokio::test]
    async fn test_connect_to_non_ssh_server_fails_handshake() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n");
            }
        });

        let connector = SshConnector::new(format!("jdoe@127.0.0.1:{}", port), None)
            .with_connect_timeout(Duration::from_secs(5));
        let result = connector.connect().await;
        server.join().unwrap();

        match result {
            Err(RemoteError::Connect { reason, .. }) => {
                assert!(reason.starts_with("SSH handshake failed"), "{}", reason);
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("handshake with a non-SSH server succeeded"),
        }
    }
}
