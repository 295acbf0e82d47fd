//! Transport Components
//!
//! This module implements the byte-level collaborators of the pipeline: line
//! framing, TCP and capture-file transports, a scheme-dispatching provider and
//! a static discovery source built from configuration.
use crate::api::controller::{DeviceDiscovery, Transport, TransportProvider};
use crate::core::constants::MAX_LINE_LEN;
use crate::model::descriptor::DeviceDescriptor;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::{debug, trace};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

const READ_CHUNK: usize = 1024;

/// Accumulates raw bytes and splits them into complete lines.
///
/// Bytes after the last newline are retained until the rest of the line
/// arrives. A trailing `\r` is stripped and empty lines are skipped. A partial
/// line that grows past [`MAX_LINE_LEN`] is dropped up to its newline and
/// counted as an overflow.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,
    discarding: bool,
    overflows: u64,
}

impl LineAssembler {
    /// Appends `bytes` and returns every line they completed.
    ///
    /// Only `bytes` is scanned for newlines; the retained remainder is never
    /// searched again.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for segment in bytes.split_inclusive(|&b| b == b'\n') {
            let (body, complete) = match segment.split_last() {
                Some((&b'\n', body)) => (body, true),
                _ => (segment, false),
            };
            if !self.discarding {
                if self.pending.len() + body.len() > MAX_LINE_LEN {
                    trace!("Discarding line longer than {} bytes", MAX_LINE_LEN);
                    self.pending.clear();
                    self.discarding = true;
                    self.overflows += 1;
                } else {
                    self.pending.extend_from_slice(body);
                }
            }
            if !complete {
                continue;
            }
            if self.discarding {
                self.discarding = false;
                continue;
            }
            let mut line = std::mem::take(&mut self.pending);
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if !line.is_empty() {
                lines.push(line);
            }
        }
        lines
    }

    /// Number of buffered bytes not yet terminated by a newline.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Returns and resets the number of lines dropped for exceeding
    /// [`MAX_LINE_LEN`].
    pub fn take_overflows(&mut self) -> u64 {
        std::mem::take(&mut self.overflows)
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.discarding = false;
    }
}

/// Transport over a TCP connection, e.g. a serial-to-network bridge.
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

#[async_trait]
impl Transport for TcpTransport {
    async fn read(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; READ_CHUNK];
        let n = self.stream.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some(buf))
    }
}

/// Replays a captured log one line at a time, then reports end of stream.
#[derive(Debug)]
pub struct FileTransport {
    lines: VecDeque<Vec<u8>>,
    pace: Duration,
}

impl FileTransport {
    pub fn from_bytes(content: &[u8], pace: Duration) -> Self {
        let lines = content
            .split_inclusive(|&b| b == b'\n')
            .map(|line| line.to_vec())
            .collect();
        Self { lines, pace }
    }
}

#[async_trait]
impl Transport for FileTransport {
    async fn read(&mut self) -> Result<Option<Vec<u8>>> {
        if self.lines.is_empty() {
            return Ok(None);
        }
        tokio::time::sleep(self.pace).await;
        Ok(self.lines.pop_front())
    }
}

/// Opens transports by descriptor scheme: `tcp://host:port` or `file:/path`.
#[derive(Clone, Debug)]
pub struct DescriptorTransportProvider {
    replay_pace: Duration,
}

impl DescriptorTransportProvider {
    /// `replay_pace` is the delay between lines replayed from capture files.
    pub fn new(replay_pace: Duration) -> Self {
        Self { replay_pace }
    }
}

#[async_trait]
impl TransportProvider for DescriptorTransportProvider {
    async fn open(&self, descriptor: &str) -> Result<Box<dyn Transport>> {
        if let Some(addr) = descriptor.strip_prefix("tcp://") {
            debug!("Opening TCP transport to {}", addr);
            let stream = TcpStream::connect(addr)
                .await
                .map_err(|e| anyhow!("could not connect to {}: {}", addr, e))?;
            Ok(Box::new(TcpTransport { stream }))
        } else if let Some(path) = descriptor.strip_prefix("file:") {
            debug!("Opening capture file {}", path);
            let content = tokio::fs::read(path)
                .await
                .map_err(|e| anyhow!("could not read {}: {}", path, e))?;
            trace!("Capture file {} holds {} bytes", path, content.len());
            Ok(Box::new(FileTransport::from_bytes(&content, self.replay_pace)))
        } else {
            Err(anyhow!("unsupported transport descriptor {:?}", descriptor))
        }
    }
}

/// Discovery source that returns a fixed list of endpoints.
#[derive(Clone, Debug, Default)]
pub struct StaticDiscovery {
    devices: Vec<DeviceDescriptor>,
}

impl StaticDiscovery {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        Self { devices }
    }
}

#[async_trait]
impl DeviceDiscovery for StaticDiscovery {
    async fn discover(&self) -> Result<Vec<DeviceDescriptor>> {
        let mut devices = self.devices.clone();
        devices.sort();
        Ok(devices)
    }
}
