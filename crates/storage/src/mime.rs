//! Content-type sniffing from leading bytes.

use depot_core::DEFAULT_MIME_TYPE;

/// Bytes inspected when sniffing.
pub const SNIFF_LEN: usize = 8192;

/// Detect a mime type from the first bytes of a blob.
pub fn sniff(head: &[u8]) -> String {
    infer::get(head)
        .map(|kind| kind.mime_type().to_string())
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string())
}
