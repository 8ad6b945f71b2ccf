//! Production connector for `tcp://` and `file://` endpoints.
//!
//! TCP services speak a line-oriented inline protocol: an optional
//! `AUTH <credential>` answered by `+OK`, then `PING` answered by `+PONG`.
//! File endpoints back blob storage and are checked by writing, syncing and
//! removing a probe file.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

use crc32fast::Hasher;
use genesis_config::ServiceDeclaration;
use tracing::debug;

use super::{BackingClient, ClientError, Connector, ProbeFailure};

const PROBE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::probe");

/// Connector used by the daemon binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkConnector;

impl Connector for NetworkConnector {
    fn connect(
        &self,
        service: &ServiceDeclaration,
        timeout: Duration,
    ) -> Result<Box<dyn BackingClient>, ProbeFailure> {
        match service.endpoint.scheme() {
            "tcp" => TcpClient::connect(service, timeout)
                .map(|client| Box::new(client) as Box<dyn BackingClient>),
            "file" => {
                let root = service.endpoint.to_file_path().map_err(|()| {
                    ProbeFailure::Unreachable(format!(
                        "'{}' is not a local path",
                        service.endpoint
                    ))
                })?;
                Ok(Box::new(FileStoreClient { root, open: true }))
            }
            other => Err(ProbeFailure::Unreachable(format!(
                "unsupported scheme '{other}'"
            ))),
        }
    }
}

struct TcpClient {
    reader: Option<BufReader<TcpStream>>,
    credential: Option<String>,
    timeout: Duration,
}

impl TcpClient {
    fn connect(service: &ServiceDeclaration, timeout: Duration) -> Result<Self, ProbeFailure> {
        let host = service
            .endpoint
            .host_str()
            .ok_or_else(|| ProbeFailure::Unreachable("endpoint has no host".to_owned()))?;
        let port = service
            .endpoint
            .port()
            .ok_or_else(|| ProbeFailure::Unreachable("endpoint has no port".to_owned()))?;
        let addresses = (host, port)
            .to_socket_addrs()
            .map_err(|error| ProbeFailure::Unreachable(format!("cannot resolve {host}: {error}")))?;

        let mut last_error = None;
        for address in addresses {
            match TcpStream::connect_timeout(&address, timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeout))?;
                    stream.set_write_timeout(Some(timeout))?;
                    stream.set_nodelay(true)?;
                    debug!(
                        target: PROBE_TARGET,
                        service = %service.name,
                        %address,
                        "connected"
                    );
                    return Ok(Self {
                        reader: Some(BufReader::new(stream)),
                        credential: service.credential.clone(),
                        timeout,
                    });
                }
                Err(error) => last_error = Some(error),
            }
        }
        Err(match last_error {
            Some(error) => classify(error, timeout),
            None => ProbeFailure::Unreachable(format!("{host} resolved to no addresses")),
        })
    }

    fn round_trip(&mut self, line: &[u8]) -> io::Result<String> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "client closed"))?;
        let stream = reader.get_mut();
        stream.write_all(line)?;
        stream.write_all(b"\r\n")?;
        stream.flush()?;
        let mut reply = String::new();
        if reader.read_line(&mut reply)? == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "service closed the connection",
            ));
        }
        Ok(reply.trim_end().to_owned())
    }
}

impl BackingClient for TcpClient {
    fn verify(&mut self) -> Result<(), ProbeFailure> {
        if let Some(credential) = self.credential.clone() {
            let reply = self
                .round_trip(format!("AUTH {credential}").as_bytes())
                .map_err(|error| classify(error, self.timeout))?;
            if reply != "+OK" {
                return Err(ProbeFailure::Unauthorised(reply));
            }
        }
        let reply = self
            .round_trip(b"PING")
            .map_err(|error| classify(error, self.timeout))?;
        if reply == "+PONG" {
            Ok(())
        } else {
            Err(ProbeFailure::UnexpectedReply(reply))
        }
    }

    fn call(&mut self, request: &[u8]) -> Result<Vec<u8>, ClientError> {
        if self.reader.is_none() {
            return Err(ClientError::Closed);
        }
        let reply = self.round_trip(request)?;
        match reply.strip_prefix('-') {
            Some(message) => Err(ClientError::Service(message.to_owned())),
            None => Ok(reply.into_bytes()),
        }
    }

    fn close(&mut self) {
        if let Some(reader) = self.reader.take()
            && let Err(error) = reader.into_inner().shutdown(std::net::Shutdown::Both)
        {
            debug!(target: PROBE_TARGET, error = %error, "connection shutdown failed");
        }
    }
}

struct FileStoreClient {
    root: PathBuf,
    open: bool,
}

impl BackingClient for FileStoreClient {
    fn verify(&mut self) -> Result<(), ProbeFailure> {
        if !self.root.is_dir() {
            return Err(ProbeFailure::Unreachable(format!(
                "'{}' is not a directory",
                self.root.display()
            )));
        }
        let probe = self
            .root
            .join(format!(".genesis-probe-{}", std::process::id()));
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&probe)?;
        file.write_all(b"probe")?;
        file.sync_all()?;
        fs::remove_file(&probe)?;
        Ok(())
    }

    /// Stores `request` as a content-addressed blob and returns its key.
    fn call(&mut self, request: &[u8]) -> Result<Vec<u8>, ClientError> {
        if !self.open {
            return Err(ClientError::Closed);
        }
        let mut hasher = Hasher::new();
        hasher.update(request);
        let key = format!("{:08x}-{}", hasher.finalize(), request.len());
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(self.root.join(&key))?;
        file.write_all(request)?;
        file.sync_all()?;
        Ok(key.into_bytes())
    }

    fn close(&mut self) {
        self.open = false;
    }
}

fn classify(error: io::Error, timeout: Duration) -> ProbeFailure {
    match error.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => ProbeFailure::TimedOut(timeout),
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::NotConnected => ProbeFailure::Unreachable(error.to_string()),
        _ => ProbeFailure::Io(error),
    }
}
