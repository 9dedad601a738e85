//! Memory-mapped weight loading and the weight cache (spec §4.B, §6).

use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::buffer::{BorrowedData, Buffer, BufferDesc};
use crate::error::{EngineError, Result};
use crate::precision::Precision;

/// One mapped weight file kept alive for the model's lifetime. `Graph`
/// holds a `Vec<WeightMapping>`; nodes borrow from these via raw
/// pointers that stay valid as long as the mapping does.
pub struct WeightMapping {
    pub path: PathBuf,
    pub mmap: Mmap,
    pub desc: BufferDesc,
    pub header_len: usize,
}

/// Caches mapped files by path so `mmap_weights` is idempotent
/// (invariant 4: two calls with the same path return the same id, and
/// never produce two distinct mmaps).
#[derive(Default)]
pub struct WeightCache {
    pub(crate) by_path: HashMap<PathBuf, crate::graph::node::NodeId>,
}

const HEADER_MAGIC: &[u8; 4] = b"CRTX";

/// Parses the self-describing binary header: magic, precision tag,
/// rank, then `rank` little-endian `u64` shape extents, followed by the
/// naturally-aligned row-major payload (spec §6).
fn parse_header(bytes: &[u8]) -> Result<(BufferDesc, usize)> {
    if bytes.len() < 6 || &bytes[0..4] != HEADER_MAGIC {
        return Err(EngineError::InvalidModelDirectory(
            "weight file missing CRTX header".into(),
        ));
    }
    let precision = match bytes[4] {
        0 => Precision::I8,
        1 => Precision::F16,
        2 => Precision::F32,
        other => {
            return Err(EngineError::InvalidModelDirectory(format!(
                "unknown precision tag {other}"
            )))
        }
    };
    let rank = bytes[5] as usize;
    let shape_start = 6;
    let shape_end = shape_start + rank * 8;
    if bytes.len() < shape_end {
        return Err(EngineError::InvalidModelDirectory(
            "weight file truncated in shape header".into(),
        ));
    }
    let mut shape = Vec::with_capacity(rank);
    for i in 0..rank {
        let off = shape_start + i * 8;
        let extent = u64::from_le_bytes(bytes[off..off + 8].try_into().unwrap()) as usize;
        shape.push(extent);
    }
    Ok((BufferDesc::new(shape, precision), shape_end))
}

/// Loads the sibling `X.scale` ASCII-float file for an I8 weight, if
/// present.
fn load_scale_sibling(path: &Path) -> Result<Option<f32>> {
    let scale_path = path.with_extension("scale");
    if !scale_path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&scale_path).map_err(|e| {
        EngineError::InvalidModelDirectory(format!(
            "failed to read scale file {}: {e}",
            scale_path.display()
        ))
    })?;
    let scale: f32 = text.trim().parse().map_err(|_| {
        EngineError::InvalidModelDirectory(format!(
            "malformed scale file {}",
            scale_path.display()
        ))
    })?;
    Ok(Some(scale))
}

/// Maps `path`, parses its header, and returns the borrowed buffer
/// descriptor plus a `WeightMapping` to keep the mmap alive.
pub fn map_weight_file(path: &Path) -> Result<(BufferDesc, WeightMapping)> {
    let file = File::open(path).map_err(|e| {
        EngineError::InvalidModelDirectory(format!("failed to open {}: {e}", path.display()))
    })?;
    // SAFETY: the weight directory is trusted, read-only model input;
    // the mapping is kept alive for the graph's lifetime in `WeightMapping`.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| {
        EngineError::InvalidModelDirectory(format!("failed to mmap {}: {e}", path.display()))
    })?;
    let (mut desc, payload_start) = parse_header(&mmap)?;
    let expected_payload = desc.byte_size();
    if mmap.len() < payload_start + expected_payload {
        return Err(EngineError::InvalidModelDirectory(format!(
            "weight file {} shorter than header declares",
            path.display()
        )));
    }
    if desc.precision == Precision::I8 {
        if let Some(scale) = load_scale_sibling(path)? {
            desc = desc.with_scale(scale);
        }
    }
    let mapping = WeightMapping {
        path: path.to_path_buf(),
        mmap,
        desc: desc.clone(),
        header_len: payload_start,
    };
    Ok((desc, mapping))
}

/// Builds a `Buffer::Borrowed` view over `mapping`'s payload region.
///
/// # Safety
/// `mapping` must outlive every use of the returned buffer; callers
/// keep the mapping in `Graph::weight_mappings` for exactly this reason.
pub unsafe fn borrow_payload(mapping: &WeightMapping) -> Buffer {
    let ptr = mapping.mmap.as_ptr().add(mapping.header_len);
    let len = mapping.desc.total_elements();
    Buffer::Borrowed(BorrowedData::new(ptr, len, mapping.desc.precision))
}
