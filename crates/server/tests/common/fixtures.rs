//! Test fixtures for generating test data.

use bytes::Bytes;
use depot_core::ContentHash;
use depot_origin::CatalogDocument;
use std::net::TcpListener;

/// Plaintext admin token matching `AdminConfig::for_testing`.
#[allow(dead_code)]
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// Generate deterministic test data based on a seed.
pub fn seeded_bytes(seed: u64, len: usize) -> Bytes {
    let mut data = vec![0u8; len];
    let mut state = seed;

    for chunk in data.chunks_mut(8) {
        // Simple LCG for deterministic data
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let bytes = state.to_le_bytes();
        for (i, byte) in chunk.iter_mut().enumerate() {
            *byte = bytes[i % 8];
        }
    }

    Bytes::from(data)
}

/// Compute SHA-256 hash of data as hex string.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub fn sha256_hash(data: &[u8]) -> String {
    ContentHash::compute(data).to_hex()
}

/// Some sandboxes forbid binding sockets; httpmock tests skip there.
#[allow(dead_code)]
pub fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

/// One object as listed in a test catalog.
#[allow(dead_code)]
pub struct CatalogObject<'a> {
    pub id: &'a str,
    pub data: &'a [u8],
    pub with_hash: bool,
}

#[allow(dead_code)]
impl<'a> CatalogObject<'a> {
    pub fn new(id: &'a str, data: &'a [u8]) -> Self {
        Self {
            id,
            data,
            with_hash: false,
        }
    }

    pub fn hashed(id: &'a str, data: &'a [u8]) -> Self {
        Self {
            id,
            data,
            with_hash: true,
        }
    }
}

/// A catalog with bucket `1:0` operated by worker 1 (the test node) holding
/// `objects` on `origins`, plus bucket `2:0` of worker 2 holding
/// `foreign-1`, which the test node does not distribute.
#[allow(dead_code)]
pub fn catalog(origins: &[String], objects: &[CatalogObject<'_>]) -> CatalogDocument {
    let object_ids: Vec<&str> = objects.iter().map(|o| o.id).collect();
    let mut entries: Vec<serde_json::Value> = objects
        .iter()
        .map(|o| {
            let mut entry = serde_json::json!({ "id": o.id, "size": o.data.len() });
            if o.with_hash {
                entry["hash"] = serde_json::json!(format!("sha256:{}", sha256_hash(o.data)));
            }
            entry
        })
        .collect();
    entries.push(serde_json::json!({ "id": "foreign-1", "size": 10 }));

    serde_json::from_value(serde_json::json!({
        "buckets": [
            { "id": "1:0", "operators": [1], "origins": origins, "objects": object_ids },
            { "id": "2:0", "operators": [2], "origins": ["http://127.0.0.1:9"], "objects": ["foreign-1"] }
        ],
        "objects": entries
    }))
    .expect("valid catalog document")
}
