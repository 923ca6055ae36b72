//! Save states for the BUS console.
//!
//! Two layers:
//!
//! - [`ConsoleState`] — bincode record wrapping the per-component blobs
//!   (engine, RIOT, TIA, cartridge). This is what rewind slots hold.
//! - Save-state files — a machine snapshot plus the display buffer,
//!   deflate-compressed behind a small header.
//!
//! ## File format
//!
//! ```text
//! +------------------+
//! | Magic "BUSS"     |  4 bytes
//! +------------------+
//! | Format version   |  u32 little-endian (currently 1)
//! +------------------+
//! | Cartridge kind   |  u8 (0 = BUS)
//! +------------------+
//! | Compressed data  |  deflate-compressed bincode payload
//! +------------------+
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Magic bytes identifying a BUS save state file.
const MAGIC: &[u8; 4] = b"BUSS";
/// Current save state format version.
const FORMAT_VERSION: u32 = 1;
/// Header length: magic + version + kind
const HEADER_LEN: usize = 9;

/// Cartridge kind byte for the BUS scheme.
pub const KIND_BUS: u8 = 0;

/// Save-state file errors.
#[derive(Debug, Error)]
pub enum SaveStateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid save state file (bad magic)")]
    BadMagic,
    #[error("unsupported save state version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("cartridge kind mismatch: save={found} current={expected}")]
    KindMismatch { found: u8, expected: u8 },
    #[error("decompress error: {0}")]
    Decompress(String),
    #[error("serialize error: {0}")]
    Serialize(#[from] bincode::Error),
}

// ─── Machine snapshot ───────────────────────────────────────────────────────

/// Whole-machine snapshot. Component blobs are opaque here; each component
/// encodes and validates its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsoleState {
    /// Host cycle counter
    pub cycles: u64,
    /// CPU/video engine
    pub engine: Vec<u8>,
    pub riot: Vec<u8>,
    pub tia: Vec<u8>,
    /// Cartridge record (starts with its name tag)
    pub cart: Vec<u8>,
}

impl ConsoleState {
    pub fn encode(&self, out: &mut Vec<u8>) -> bool {
        bincode::serialize_into(out, self).is_ok()
    }

    pub fn decode(input: &[u8]) -> Option<Self> {
        bincode::deserialize(input).ok()
    }
}

/// Contents of a save-state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SaveState {
    /// Encoded [`ConsoleState`]
    pub machine: Vec<u8>,
    /// Display buffer at the time of the save
    pub display: Vec<u8>,
}

// ─── File I/O ───────────────────────────────────────────────────────────────

/// Encode a save state with header and deflate compression.
pub fn encode_file(state: &SaveState, kind: u8) -> Result<Vec<u8>, SaveStateError> {
    let payload = bincode::serialize(state)?;
    let compressed = miniz_oxide::deflate::compress_to_vec(&payload, 6);

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.push(kind);
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Decode a save state, verifying magic, version and cartridge kind.
pub fn decode_file(data: &[u8], expected_kind: u8) -> Result<SaveState, SaveStateError> {
    if data.len() < HEADER_LEN || &data[0..4] != MAGIC {
        return Err(SaveStateError::BadMagic);
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(SaveStateError::Version { found: version, expected: FORMAT_VERSION });
    }
    let kind = data[8];
    if kind != expected_kind {
        return Err(SaveStateError::KindMismatch { found: kind, expected: expected_kind });
    }

    let decompressed = miniz_oxide::inflate::decompress_to_vec(&data[HEADER_LEN..])
        .map_err(|e| SaveStateError::Decompress(format!("{:?}", e)))?;
    Ok(bincode::deserialize(&decompressed)?)
}

/// Save state to file.
pub fn save_to_file(state: &SaveState, kind: u8, path: &Path) -> Result<(), SaveStateError> {
    let out = encode_file(state, kind)?;
    std::fs::write(path, out)?;
    Ok(())
}

/// Load state from file.
pub fn load_from_file(path: &Path, expected_kind: u8) -> Result<SaveState, SaveStateError> {
    let data = std::fs::read(path)?;
    decode_file(&data, expected_kind)
}

/// Derive save state file path from ROM file path.
/// `game.bin` → `game.state`, `game.a26` → `game.state`
pub fn state_path(rom_path: &str) -> String {
    let p = Path::new(rom_path);
    let stem = p.file_stem().and_then(|s| s.to_str()).unwrap_or("game");
    let dir = p.parent().unwrap_or(Path::new("."));
    dir.join(format!("{}.state", stem)).to_string_lossy().into_owned()
}
