use std::fs::File;
use std::io::{self, Read, Write};

use anyhow::{bail, Context};
use bytes::{Buf, Bytes};

/// File bodies are pulled into memory this much at a time.
pub const FILE_CHUNK_SIZE: usize = 8 * 1024;

/// Body of a finalized response.
#[derive(Debug)]
pub enum BodySource {
    Memory(Bytes),
    File {
        file: File,
        /// Bytes of the file not yet read into `chunk`.
        unread: u64,
        chunk: Bytes,
    },
}

impl BodySource {
    pub(crate) fn file(file: File, length: u64) -> Self {
        BodySource::File {
            file,
            unread: length,
            chunk: Bytes::new(),
        }
    }

    fn remaining(&self) -> u64 {
        match self {
            BodySource::Memory(bytes) => bytes.remaining() as u64,
            BodySource::File { unread, chunk, .. } => *unread + chunk.remaining() as u64,
        }
    }
}

/// A frozen response being streamed to a non-blocking peer.
///
/// The header block goes out completely before the first body byte, and
/// only bytes the peer accepted are consumed.
#[derive(Debug)]
pub struct ResponseWriter {
    head: Bytes,
    body: BodySource,
}

impl ResponseWriter {
    pub(crate) fn new(head: Bytes, body: BodySource) -> Self {
        Self { head, body }
    }

    /// True while any header or body byte is still unsent.
    pub fn has_data(&self) -> bool {
        self.head.has_remaining() || self.body.remaining() > 0
    }

    /// Writes as much as `out` accepts.
    ///
    /// Returns `Ok(())` when everything was sent or when `out` would block;
    /// check [`has_data`](Self::has_data) to tell the two apart.
    pub fn transfer_to<W: Write>(&mut self, out: &mut W) -> anyhow::Result<()> {
        if !write_buffer(&mut self.head, out)? {
            return Ok(());
        }

        match &mut self.body {
            BodySource::Memory(bytes) => {
                write_buffer(bytes, out)?;
            }
            BodySource::File { file, unread, chunk } => loop {
                if !chunk.has_remaining() {
                    if *unread == 0 {
                        break;
                    }
                    let want = (*unread).min(FILE_CHUNK_SIZE as u64) as usize;
                    let mut buffer = vec![0u8; want];
                    let n = file.read(&mut buffer).context("failed to read response file")?;
                    if n == 0 {
                        bail!("response file ended {unread} bytes early");
                    }
                    buffer.truncate(n);
                    *unread -= n as u64;
                    *chunk = Bytes::from(buffer);
                }
                if !write_buffer(chunk, out)? {
                    break;
                }
            },
        }
        Ok(())
    }
}

/// Drains `buffer` into `out`; returns false if `out` would block first.
fn write_buffer<W: Write>(buffer: &mut Bytes, out: &mut W) -> anyhow::Result<bool> {
    while buffer.has_remaining() {
        match out.write(buffer.chunk()) {
            Ok(0) => bail!("peer accepted zero bytes"),
            Ok(n) => buffer.advance(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(false),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("failed to write response"),
        }
    }
    Ok(true)
}
