//! NIP-95 file storage: chunked kind-1064 events plus a kind-1065 header.
//!
//! A file is split into base64 chunks sized so every signed chunk event
//! stays within the relay's message limit, and described by a header event
//! carrying the whole-file SHA-256 and the ordered chunk ids. The encoder
//! makes two passes over the blob so files larger than memory never get
//! buffered: one to hash and collect chunk ids, one to emit events.

use std::io::{Read, Seek, SeekFrom};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::event::{Event, EventTemplate, Signer, Tag, KIND_FILE_CHUNK, KIND_FILE_HEADER};

/// Byte length of the JSON envelope of a signed chunk event with empty
/// content and a 10-digit timestamp. Everything in it is fixed-width.
pub const EVENT_OVERHEAD: usize = 345;

/// Options for encoding one file.
#[derive(Debug, Clone)]
pub struct FileEncodeOptions {
    /// Maximum encoded JSON length per event.
    pub max_message_size: usize,
    pub file_name: String,
    /// Required; guessing from the extension is the caller's job.
    pub mime_type: Option<String>,
    pub description: Option<String>,
    pub alt: Option<String>,
    /// Defaults to the current time. All emitted events share it.
    pub created_at: Option<u64>,
}

/// Largest chunk, in raw bytes, whose base64 form fits `max_message_size`.
///
/// Rounded down to a multiple of 3 so base64 never pads mid-file.
pub fn chunk_size_for(max_message_size: usize) -> Result<u64> {
    let content = max_message_size.saturating_sub(EVENT_OVERHEAD);
    let chunk = content * 3 / 4 / 3 * 3;
    if chunk == 0 {
        return Err(Error::MessageSize(format!(
            "max message size {max_message_size} leaves no room for content"
        )));
    }
    Ok(chunk as u64)
}

/// Lazy event sequence: the header event first, then chunks in order.
///
/// Chunks are re-read from the blob as the iterator advances; the signer's
/// determinism guarantees the re-derived events match the ids recorded in
/// the header.
pub struct FileEvents<'s, R> {
    reader: R,
    signer: &'s dyn Signer,
    header: Option<Event>,
    chunk_size: u64,
    chunk_count: u64,
    next_chunk: u64,
    created_at: u64,
}

impl<R: Read + Seek> Iterator for FileEvents<'_, R> {
    type Item = Result<Event>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(header) = self.header.take() {
            return Some(Ok(header));
        }
        if self.next_chunk >= self.chunk_count {
            return None;
        }
        let index = self.next_chunk;
        self.next_chunk += 1;
        Some(self.emit_chunk(index))
    }
}

impl<R: Read + Seek> FileEvents<'_, R> {
    fn emit_chunk(&mut self, index: u64) -> Result<Event> {
        self.reader
            .seek(SeekFrom::Start(index * self.chunk_size))?;
        let mut buf = Vec::with_capacity(self.chunk_size as usize);
        (&mut self.reader)
            .take(self.chunk_size)
            .read_to_end(&mut buf)?;
        self.signer.sign(&chunk_template(&buf, self.created_at))
    }
}

fn chunk_template(bytes: &[u8], created_at: u64) -> EventTemplate {
    EventTemplate {
        kind: KIND_FILE_CHUNK,
        created_at,
        tags: vec![],
        content: BASE64.encode(bytes),
    }
}

/// Split a blob into signed chunk events and build the header event.
///
/// Returns the lazy sequence described by [`FileEvents`]. The first pass
/// performed here streams the whole blob once to hash it and sign each
/// chunk for its id; nothing larger than one chunk is held in memory.
pub fn encode_file<R: Read + Seek>(
    mut reader: R,
    signer: &dyn Signer,
    opts: FileEncodeOptions,
) -> Result<FileEvents<'_, R>> {
    let mime_type = opts.mime_type.clone().ok_or(Error::MissingMimeType)?;
    let chunk_size = chunk_size_for(opts.max_message_size)?;
    let created_at = match opts.created_at {
        Some(ts) => ts,
        None => SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0),
    };

    reader.seek(SeekFrom::Start(0))?;
    let mut hasher = Sha256::new();
    let mut chunk_ids = Vec::new();
    let mut total: u64 = 0;
    loop {
        let mut buf = Vec::with_capacity(chunk_size as usize);
        (&mut reader).take(chunk_size).read_to_end(&mut buf)?;
        if buf.is_empty() && !chunk_ids.is_empty() {
            break;
        }
        total += buf.len() as u64;
        hasher.update(&buf);
        let event = signer.sign(&chunk_template(&buf, created_at))?;
        check_size(&event, opts.max_message_size)?;
        chunk_ids.push(event.id);
        if (buf.len() as u64) < chunk_size {
            break;
        }
    }
    let hash = hex::encode(hasher.finalize());

    let mut tags = vec![
        Tag::new(["name", opts.file_name.as_str()]),
        Tag::new(["m", mime_type.as_str()]),
        Tag::new(["x", hash.as_str()]),
        Tag::new(["fileName", opts.file_name.as_str()]),
        Tag::new(["size", total.to_string().as_str()]),
    ];
    if chunk_ids.len() > 1 {
        tags.push(Tag::new(["blockSize", chunk_size.to_string().as_str()]));
    }
    let chunk_count = chunk_ids.len() as u64;
    for id in &chunk_ids {
        tags.push(Tag::new(["e", id.as_str()]));
    }
    if let Some(alt) = &opts.alt {
        tags.push(Tag::new(["alt", alt.as_str()]));
    }
    let header = signer.sign(&EventTemplate {
        kind: KIND_FILE_HEADER,
        created_at,
        tags,
        content: opts.description.clone().unwrap_or_default(),
    })?;
    check_size(&header, opts.max_message_size)?;

    Ok(FileEvents {
        reader,
        signer,
        header: Some(header),
        chunk_size,
        chunk_count,
        next_chunk: 0,
        created_at,
    })
}

fn check_size(event: &Event, max_message_size: usize) -> Result<()> {
    let len = serde_json::to_string(event)?.len();
    if len > max_message_size {
        return Err(Error::MessageSize(format!(
            "kind {} event is {len} bytes, limit {max_message_size}",
            event.kind
        )));
    }
    Ok(())
}

/// Rebuild a file from its header event and chunk events.
///
/// Chunks are reordered to match the header's `e` tags and the result is
/// checked against the header's `x` hash.
pub fn assemble(header: &Event, chunks: &[Event]) -> Result<Vec<u8>> {
    if header.kind != KIND_FILE_HEADER {
        return Err(Error::Protocol(format!(
            "kind {} is not a file header",
            header.kind
        )));
    }
    let mut bytes = Vec::new();
    for id in header.tag_values("e") {
        let chunk = chunks
            .iter()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::Protocol(format!("missing chunk event {id}")))?;
        let decoded = BASE64
            .decode(chunk.content.as_bytes())
            .map_err(|e| Error::Protocol(format!("chunk {id} is not base64: {e}")))?;
        bytes.extend_from_slice(&decoded);
    }
    let expected = header
        .tag_values("x")
        .next()
        .ok_or_else(|| Error::Protocol("file header has no x tag".into()))?;
    let actual = hex::encode(Sha256::digest(&bytes));
    if actual != expected {
        return Err(Error::Protocol(format!(
            "file hash mismatch: header says {expected}, content is {actual}"
        )));
    }
    Ok(bytes)
}
