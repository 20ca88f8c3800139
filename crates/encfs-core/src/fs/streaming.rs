//! Streaming access to encrypted file content.
//!
//! [`ContentReader`] decrypts block by block with a one-block cache and
//! supports block-aligned random access. [`ContentWriter`] buffers one block
//! of plaintext, encrypts each block as it fills and writes the per-file
//! header together with the first block.
//!
//! A handle either reads or writes; there is no mixed mode. Open a new handle
//! to switch.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use tracing::{debug, instrument, trace, warn};
use zeroize::Zeroizing;

use super::file::{ContentCipher, ContentContext, ContentError, HEADER_SIZE};
use crate::provider::RawInput;

/// Read until `buf` is full or the input is exhausted.
fn read_full(input: &mut dyn RawInput, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ============================================================================
// ContentReader
// ============================================================================

/// Random-access reader for an encrypted file.
///
/// Reads never return more than the rest of the current block, so a short
/// read means either end of file or a block boundary. Seeking is limited to
/// multiples of the data block size; byte positions inside a block are
/// reached by reading forward or with [`read_range`](Self::read_range).
///
/// # Example
///
/// ```ignore
/// let mut reader = volume.open_read("/docs/report.txt")?;
///
/// // Bytes 1000..2000 (decrypts only the blocks involved)
/// let data = reader.read_range(1000, 1000)?;
///
/// let size = reader.plaintext_size();
/// ```
pub struct ContentReader {
    input: Box<dyn RawInput>,
    cipher: ContentCipher,
    file_iv: u64,
    plaintext_size: u64,
    position: u64,
    /// Cached block: (block index, decrypted data)
    cached_block: Option<(u64, Zeroizing<Vec<u8>>)>,
    /// Plaintext path (for error context)
    path: String,
}

impl fmt::Debug for ContentReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentReader")
            .field("path", &self.path)
            .field("plaintext_size", &self.plaintext_size)
            .field("position", &self.position)
            .field("file_iv", &"[REDACTED]")
            .field("cached_block", &self.cached_block.as_ref().map(|(n, _)| n))
            .finish_non_exhaustive()
    }
}

impl ContentReader {
    /// Open a reader over raw encrypted bytes.
    ///
    /// `external_iv` seeds the header decryption; it is the path's chained
    /// name IV when external IV chaining is on, and 0 otherwise.
    #[instrument(level = "debug", skip(input, cipher), fields(path = %path.as_ref()))]
    pub fn open(
        mut input: Box<dyn RawInput>,
        cipher: ContentCipher,
        external_iv: u64,
        path: impl AsRef<str>,
    ) -> Result<Self, ContentError> {
        let path = path.as_ref().to_owned();
        let context = || ContentContext::new().with_path(path.clone()).with_operation("open");

        let raw_size = input
            .seek(SeekFrom::End(0))
            .map_err(|e| ContentError::io_with_context(e, context()))?;
        let layout = *cipher.layout();

        let file_iv = if layout.unique_iv && raw_size > 0 {
            if raw_size < HEADER_SIZE as u64 {
                return Err(ContentError::InvalidHeader {
                    reason: format!("file is {raw_size} bytes, shorter than its header"),
                    context: context(),
                });
            }
            let mut header = [0u8; HEADER_SIZE];
            input
                .seek(SeekFrom::Start(0))
                .and_then(|_| input.read_exact(&mut header))
                .map_err(|e| ContentError::io_with_context(e, context()))?;
            cipher
                .decrypt_header(&header, external_iv)
                .map_err(|e| with_context(e, context()))?
        } else {
            0
        };

        let plaintext_size = layout.plaintext_size(raw_size);
        debug!(raw_size, plaintext_size, "Opened content reader");

        Ok(Self {
            input,
            cipher,
            file_iv,
            plaintext_size,
            position: 0,
            cached_block: None,
            path,
        })
    }

    /// Total plaintext size of the file.
    #[inline]
    pub fn plaintext_size(&self) -> u64 {
        self.plaintext_size
    }

    /// Current plaintext position.
    #[inline]
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Move to a plaintext offset that is a multiple of the data block size.
    /// Offsets past the end are allowed; reads there return nothing.
    pub fn seek_to(&mut self, offset: u64) -> Result<(), ContentError> {
        let block_size = self.cipher.layout().data_block_size();
        if offset % block_size as u64 != 0 {
            return Err(ContentError::UnalignedSeek {
                offset,
                block_size,
                context: ContentContext::new()
                    .with_path(self.path.clone())
                    .with_operation("seek"),
            });
        }
        self.position = offset;
        Ok(())
    }

    /// Read up to `buf.len()` bytes from the current position without
    /// crossing a block boundary. Returns 0 at end of file.
    pub fn read_block_chunk(&mut self, buf: &mut [u8]) -> Result<usize, ContentError> {
        if buf.is_empty() || self.position >= self.plaintext_size {
            return Ok(0);
        }
        let layout = *self.cipher.layout();
        let index = layout.block_index(self.position);
        let within = usize::try_from(self.position % layout.data_block_size() as u64)
            .unwrap_or(usize::MAX);

        let block = self.read_block(index)?;
        if within >= block.len() {
            return Ok(0);
        }
        let n = buf.len().min(block.len() - within);
        buf[..n].copy_from_slice(&block[within..within + n]);
        self.position += n as u64;
        Ok(n)
    }

    /// Read `len` bytes at `offset`, decrypting only the blocks involved.
    ///
    /// Returns fewer bytes than requested if the range passes end of file.
    /// The stream position is left unchanged.
    #[instrument(level = "debug", skip(self), fields(path = %self.path))]
    pub fn read_range(&mut self, offset: u64, len: usize) -> Result<Vec<u8>, ContentError> {
        if offset >= self.plaintext_size || len == 0 {
            trace!(offset, size = self.plaintext_size, "Read past EOF");
            return Ok(Vec::new());
        }
        let available = usize::try_from(self.plaintext_size - offset).unwrap_or(usize::MAX);
        let actual_len = len.min(available);

        let saved = self.position;
        self.position = offset;
        let mut result = vec![0u8; actual_len];
        let mut filled = 0;
        while filled < actual_len {
            match self.read_block_chunk(&mut result[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) => {
                    self.position = saved;
                    return Err(e);
                }
            }
        }
        self.position = saved;
        result.truncate(filled);
        trace!(read_bytes = filled, "Range read complete");
        Ok(result)
    }

    /// Read the remainder of the file from the current position.
    pub fn read_to_end_plain(&mut self) -> Result<Vec<u8>, ContentError> {
        let remaining = self.plaintext_size.saturating_sub(self.position);
        let mut out = Vec::with_capacity(usize::try_from(remaining).unwrap_or(0));
        let mut chunk = vec![0u8; self.cipher.layout().data_block_size()];
        loop {
            let n = self.read_block_chunk(&mut chunk)?;
            if n == 0 {
                break;
            }
            out.extend_from_slice(&chunk[..n]);
        }
        Ok(out)
    }

    /// Release the underlying stream.
    pub fn close(self) {}

    fn read_block(&mut self, index: u64) -> Result<Zeroizing<Vec<u8>>, ContentError> {
        if let Some((cached, ref data)) = self.cached_block
            && cached == index
        {
            trace!(block = index, "Cache hit");
            return Ok(data.clone());
        }

        let layout = *self.cipher.layout();
        let context = || {
            ContentContext::new()
                .with_path(self.path.clone())
                .with_block(index)
                .with_operation("read_block")
        };

        let mut raw = vec![0u8; layout.block_size];
        self.input
            .seek(SeekFrom::Start(layout.raw_block_offset(index)))
            .map_err(|e| ContentError::io_with_context(e, context()))?;
        let read = read_full(self.input.as_mut(), &mut raw)
            .map_err(|e| ContentError::io_with_context(e, context()))?;
        raw.truncate(read);

        let data = self
            .cipher
            .decrypt_block(index, self.file_iv, &raw)
            .map_err(|e| with_context(e, context()))?;
        let data = Zeroizing::new(data);
        self.cached_block = Some((index, data.clone()));
        Ok(data)
    }
}

impl Read for ContentReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_block_chunk(buf)?)
    }
}

impl Seek for ContentReader {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.plaintext_size.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start of file"))?;
        self.seek_to(target)?;
        Ok(target)
    }
}

impl Drop for ContentReader {
    fn drop(&mut self) {
        self.cached_block = None;
        trace!(path = %self.path, "ContentReader dropped");
    }
}

// ============================================================================
// ContentWriter
// ============================================================================

/// Sequential writer for an encrypted file.
///
/// Buffers up to one data block before encrypting and writing it. The file
/// header (when the volume uses per-file IVs) is generated on the first block
/// and written in the same call, so an interrupted write never leaves a
/// header without content.
///
/// Call [`finish`](Self::finish) to write the final partial block. Dropping an
/// unfinished writer makes a best-effort attempt to finish and logs a warning.
/// After a backend write fails the writer is closed: every later call returns
/// an error and dropping it writes nothing more.
pub struct ContentWriter {
    output: Option<Box<dyn Write + Send>>,
    cipher: ContentCipher,
    external_iv: u64,
    file_iv: Option<u64>,
    buffer: Zeroizing<Vec<u8>>,
    next_block: u64,
    written: u64,
    failed: bool,
    path: String,
}

impl fmt::Debug for ContentWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentWriter")
            .field("path", &self.path)
            .field("written", &self.written)
            .field("buffered", &self.buffer.len())
            .field("next_block", &self.next_block)
            .field("finished", &self.output.is_none())
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

impl ContentWriter {
    /// Start a new encrypted file on `output`, which must be empty.
    pub fn create(
        output: Box<dyn Write + Send>,
        cipher: ContentCipher,
        external_iv: u64,
        path: impl AsRef<str>,
    ) -> Self {
        let capacity = cipher.layout().data_block_size();
        Self {
            output: Some(output),
            cipher,
            external_iv,
            file_iv: None,
            buffer: Zeroizing::new(Vec::with_capacity(capacity)),
            next_block: 0,
            written: 0,
            failed: false,
            path: path.as_ref().to_owned(),
        }
    }

    /// Plaintext bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Append plaintext.
    pub fn write_plain(&mut self, data: &[u8]) -> Result<(), ContentError> {
        if self.output.is_none() {
            return Err(ContentError::Closed {
                context: ContentContext::new().with_path(self.path.clone()),
            });
        }
        let block_size = self.cipher.layout().data_block_size();
        let mut rest = data;
        while !rest.is_empty() {
            let take = rest.len().min(block_size - self.buffer.len());
            self.buffer.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            self.written += take as u64;
            if self.buffer.len() == block_size {
                self.flush_block()?;
            }
        }
        Ok(())
    }

    /// Write the final partial block and flush the backend stream.
    ///
    /// Returns the plaintext size of the file.
    #[instrument(level = "debug", skip(self), fields(path = %self.path))]
    pub fn finish(mut self) -> Result<u64, ContentError> {
        self.finish_inner()
    }

    fn finish_inner(&mut self) -> Result<u64, ContentError> {
        if self.failed {
            return Err(ContentError::Closed {
                context: ContentContext::new()
                    .with_path(self.path.clone())
                    .with_operation("finish"),
            });
        }
        if self.output.is_none() {
            return Ok(self.written);
        }
        if !self.buffer.is_empty() {
            self.flush_block()?;
        }
        if let Some(mut output) = self.output.take() {
            output.flush().map_err(|e| {
                ContentError::io_with_context(
                    e,
                    ContentContext::new()
                        .with_path(self.path.clone())
                        .with_operation("finish"),
                )
            })?;
        }
        debug!(bytes = self.written, blocks = self.next_block, "Content writer finished");
        Ok(self.written)
    }

    fn flush_block(&mut self) -> Result<(), ContentError> {
        let index = self.next_block;
        let context = || {
            ContentContext::new()
                .with_path(self.path.clone())
                .with_block(index)
                .with_operation("write_block")
        };

        let mut out = Vec::with_capacity(HEADER_SIZE + self.cipher.layout().block_size);
        let file_iv = match self.file_iv {
            Some(iv) => iv,
            None if self.cipher.layout().unique_iv => {
                let iv = ContentCipher::random_file_iv();
                out.extend_from_slice(&self.cipher.encrypt_header(iv, self.external_iv));
                iv
            }
            None => 0,
        };

        let block = self
            .cipher
            .encrypt_block(index, file_iv, &self.buffer)
            .map_err(|e| with_context(e, context()))?;
        out.extend_from_slice(&block);

        let output = self
            .output
            .as_mut()
            .ok_or_else(|| ContentError::Closed { context: context() })?;
        if let Err(e) = output.write_all(&out) {
            // Part of `out` may already be on disk, so no later block can be
            // placed correctly. Drop the stream so nothing else is written.
            self.output = None;
            self.failed = true;
            return Err(ContentError::io_with_context(e, context()));
        }

        self.file_iv = Some(file_iv);
        trace!(block = index, raw_len = out.len(), "Wrote block");
        self.buffer.clear();
        self.next_block += 1;
        Ok(())
    }
}

impl Write for ContentWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_plain(buf)?;
        Ok(buf.len())
    }

    /// Full blocks are written as soon as they fill; a trailing partial block
    /// stays buffered until [`ContentWriter::finish`].
    fn flush(&mut self) -> io::Result<()> {
        match self.output.as_mut() {
            Some(output) => output.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for ContentWriter {
    fn drop(&mut self) {
        if self.output.is_some() {
            warn!(path = %self.path, "ContentWriter dropped without finish(), finishing now");
            if let Err(e) = self.finish_inner() {
                warn!(path = %self.path, error = %e, "Failed to finish dropped ContentWriter");
            }
        }
    }
}

/// Replace the context of an error raised below the stream layer.
fn with_context(err: ContentError, context: ContentContext) -> ContentError {
    match err {
        ContentError::MacMismatch { .. } => ContentError::MacMismatch { context },
        ContentError::InvalidHeader { reason, .. } => ContentError::InvalidHeader { reason, context },
        ContentError::InvalidBlock { reason, .. } => ContentError::InvalidBlock { reason, context },
        ContentError::Crypto { source, .. } => ContentError::Crypto { source, context },
        other => other,
    }
}
