//! Transport for the debugger protocol.
//!
//! Each packet is preceded by headers, `Content-Length` header is mandatory and others are
//! ignored:
//! ```text
//! Content-Length: 44\r\n
//! \r\n
//! {"seq":1,"type":"request","command":"continue"}
//! ```
//! VM debugger agent greets a client with a header-only packet (`Type: connect`), such packets
//! carry no protocol message and are skipped.

use anyhow::{anyhow, Context};
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Simple file-based tracer for protocol traffic.
#[derive(Clone)]
pub struct FileTracer {
    file: Arc<Mutex<std::fs::File>>,
}

impl FileTracer {
    pub fn new(path: &Path) -> anyhow::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open trace file {}", path.display()))?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn line(&self, text: &str) {
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "{text}");
        }
    }
}

/// Reading half of a connection.
pub struct PacketReader<R: BufRead> {
    reader: R,
    tracer: Option<FileTracer>,
}

impl<R: BufRead> PacketReader<R> {
    pub fn new(reader: R, tracer: Option<FileTracer>) -> Self {
        Self { reader, tracer }
    }

    /// Read headers, return content length (zero if header is missing).
    fn read_headers(&mut self) -> anyhow::Result<usize> {
        let mut content_length: Option<usize> = None;
        loop {
            let mut line = String::new();
            let read_n = self.reader.read_line(&mut line)?;
            if read_n == 0 {
                return Err(anyhow!("debugger connection closed"));
            }
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                break;
            }
            if let Some(v) = line.strip_prefix("Content-Length:") {
                content_length = Some(v.trim().parse().context("invalid Content-Length")?);
            }
        }
        Ok(content_length.unwrap_or_default())
    }

    /// Read next protocol packet, header-only packets are skipped.
    pub fn read_packet(&mut self) -> anyhow::Result<String> {
        loop {
            let len = self.read_headers()?;
            if len == 0 {
                log::debug!(target: "transport", "header-only packet skipped");
                continue;
            }

            let mut buf = vec![0u8; len];
            self.reader.read_exact(&mut buf)?;
            let packet = String::from_utf8(buf).context("packet is not utf-8")?;
            if let Some(tracer) = &self.tracer {
                tracer.line(&format!("<- {packet}"));
            }
            return Ok(packet);
        }
    }
}

/// Writing half of a connection.
pub struct PacketWriter<W: Write> {
    writer: W,
    tracer: Option<FileTracer>,
}

impl<W: Write> PacketWriter<W> {
    pub fn new(writer: W, tracer: Option<FileTracer>) -> Self {
        Self { writer, tracer }
    }

    pub fn write_packet(&mut self, packet: &str) -> anyhow::Result<()> {
        if let Some(tracer) = &self.tracer {
            tracer.line(&format!("-> {packet}"));
        }
        write!(self.writer, "Content-Length: {}\r\n\r\n", packet.len())?;
        self.writer.write_all(packet.as_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// Connect to a VM debugger agent, return reading and writing halves of the connection.
pub fn connect(
    addr: SocketAddr,
    tracer: Option<FileTracer>,
) -> anyhow::Result<(PacketReader<BufReader<TcpStream>>, PacketWriter<TcpStream>)> {
    let stream = TcpStream::connect(addr).with_context(|| format!("connect {addr}"))?;
    stream.set_nodelay(true)?;
    let reader = BufReader::new(stream.try_clone()?);
    log::info!(target: "transport", "connected to {addr}");
    Ok((
        PacketReader::new(reader, tracer.clone()),
        PacketWriter::new(stream, tracer),
    ))
}
