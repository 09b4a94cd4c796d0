//! Core data types shared across pipeline stages.

use bytes::Bytes;

/// A routing key selecting a per-destination pipeline.
///
/// Always includes the trailing `:` from the wire/config representation
/// (e.g. `"nginx:"`); trimmed only when used in metric names.
pub type Tag = std::sync::Arc<str>;

/// Raw bytes received from a Receiver, still in
/// `<hostname>\t<tag>\t<payload>` wire framing.
#[derive(Debug, Clone)]
pub struct RawMessage(pub Bytes);

impl RawMessage {
    /// Split on the first two TAB bytes into `(hostname, tag, payload)`.
    ///
    /// Returns `None` if the message does not contain exactly three
    /// TAB-separated fields.
    pub fn split(&self) -> Option<(&str, &str, &[u8])> {
        let bytes = self.0.as_ref();
        let first = bytes.iter().position(|&b| b == b'\t')?;
        let second = bytes[first + 1..].iter().position(|&b| b == b'\t')? + first + 1;

        let hostname = std::str::from_utf8(&bytes[..first]).ok()?;
        let tag = std::str::from_utf8(&bytes[first + 1..second]).ok()?;
        let payload = &bytes[second + 1..];
        Some((hostname, tag, payload))
    }
}

/// A single-line JSON object produced by a Converter.
///
/// Invariant: contains no embedded newline.
#[derive(Debug, Clone)]
pub struct ConvertedRecord(pub Vec<u8>);

/// A contiguous buffer of concatenated [`ConvertedRecord`]s bound to one tag.
#[derive(Debug, Clone)]
pub struct Batch {
    pub tag: Tag,
    pub data: Vec<u8>,
    pub lines: usize,
}
