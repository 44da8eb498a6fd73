//! Remote backend for a VM reachable over a TCP debugger connection.
//!
//! Host services which are not part of the debugger protocol are emulated locally:
//! the inspected context id comes from configuration and the profiler log is read
//! from a file written by the VM (`--prof --logfile=<path>`).

use crate::agent::{ContextId, RemoteBackend};
use crate::protocol::Command;
use crate::transport::PacketWriter;
use anyhow::Context;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Requests outside of the sequence of session requests use this number, VM responses to
/// them are not correlated with anything.
const UNTRACKED_SEQ: u64 = 0;

/// Max size of a profiler log chunk read at once.
const LOG_CHUNK_SIZE: u64 = 64 * 1024;

/// Answer of a host service that must be delivered into the agent.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    ContextId(Option<ContextId>),
    LogLines { chunk: String, position: u64 },
}

pub struct TcpBackend<W: Write> {
    writer: PacketWriter<W>,
    context_id: Option<ContextId>,
    profiler_log: Option<PathBuf>,
    events: VecDeque<HostEvent>,
    /// Scheduled profiler log read: due time and log position.
    log_request: Option<(Instant, u64)>,
}

impl<W: Write> TcpBackend<W> {
    pub fn new(
        writer: PacketWriter<W>,
        context_id: Option<ContextId>,
        profiler_log: Option<PathBuf>,
    ) -> Self {
        Self {
            writer,
            context_id,
            profiler_log,
            events: VecDeque::new(),
            log_request: None,
        }
    }

    fn send_untracked(&mut self, name: &str, arguments: Option<Value>) -> anyhow::Result<()> {
        let cmd = Command::new(UNTRACKED_SEQ, name, arguments);
        self.writer.write_packet(&cmd.encode())
    }

    /// Time when the next scheduled host answer is due.
    pub fn next_deadline(&self) -> Option<Instant> {
        if !self.events.is_empty() {
            return Some(Instant::now());
        }
        self.log_request.map(|(due, _)| due)
    }

    /// Take host answers that are ready at `now`.
    pub fn take_ready(&mut self, now: Instant) -> Vec<HostEvent> {
        if let Some((due, position)) = self.log_request {
            if due <= now {
                self.log_request = None;
                let (chunk, position) = match self.read_log(position) {
                    Ok(read) => read,
                    Err(e) => {
                        log::warn!(target: "console", "read profiler log: {e:#}");
                        (String::new(), position)
                    }
                };
                self.events.push_back(HostEvent::LogLines { chunk, position });
            }
        }
        self.events.drain(..).collect()
    }

    /// Read profiler log from `position`, return a chunk and a position after it.
    /// Missing log is treated as empty.
    fn read_log(&self, position: u64) -> anyhow::Result<(String, u64)> {
        let Some(path) = &self.profiler_log else {
            return Ok((String::new(), position));
        };
        let mut file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok((String::new(), position))
            }
            Err(e) => return Err(e).with_context(|| format!("open {}", path.display())),
        };
        file.seek(SeekFrom::Start(position))?;

        let mut buf = vec![];
        file.take(LOG_CHUNK_SIZE).read_to_end(&mut buf)?;
        let (chunk, consumed) = decode_log_chunk(&buf);
        Ok((chunk, position + consumed as u64))
    }
}

/// Decode a log chunk, return text and the number of consumed bytes. Invalid bytes are
/// replaced with U+FFFD. A multibyte char cut at the chunk end is left for the next read.
fn decode_log_chunk(buf: &[u8]) -> (String, usize) {
    let mut chunk = String::with_capacity(buf.len());
    let mut rest = buf;
    loop {
        match std::str::from_utf8(rest) {
            Ok(text) => {
                chunk.push_str(text);
                return (chunk, buf.len());
            }
            Err(e) => {
                let (valid, invalid) = rest.split_at(e.valid_up_to());
                chunk.push_str(&String::from_utf8_lossy(valid));
                match e.error_len() {
                    Some(len) => {
                        chunk.push(char::REPLACEMENT_CHARACTER);
                        rest = &invalid[len..];
                    }
                    None => return (chunk, buf.len() - invalid.len()),
                }
            }
        }
    }
}

impl<W: Write> RemoteBackend for TcpBackend<W> {
    fn send_command(&mut self, raw: &str) -> anyhow::Result<()> {
        self.writer.write_packet(raw)
    }

    fn request_context_id(&mut self) -> anyhow::Result<()> {
        self.events
            .push_back(HostEvent::ContextId(self.context_id.clone()));
        Ok(())
    }

    fn debug_break(&mut self) -> anyhow::Result<()> {
        self.send_untracked("suspend", None)
    }

    fn start_profiling(&mut self) -> anyhow::Result<()> {
        self.send_untracked("profile", Some(json!({"command": "resume", "modules": 1})))
    }

    fn stop_profiling(&mut self) -> anyhow::Result<()> {
        self.send_untracked("profile", Some(json!({"command": "pause", "modules": 1})))
    }

    fn request_log_lines(&mut self, position: u64, delay: Duration) -> anyhow::Result<()> {
        self.log_request = Some((Instant::now() + delay, position));
        Ok(())
    }
}
