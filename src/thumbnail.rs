//! Embedded thumbnail lookup for binary glTF (GLB / VRM) files
//!
//! Only the 12-byte container header and the JSON chunk are read. The
//! thumbnail image itself stays in the binary chunk; we return its absolute
//! byte range so callers can read it on demand.

use serde_json::Value;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{LibraryError, Result};
use crate::models::ThumbnailDescriptor;

const GLB_MAGIC: u32 = 0x4654_6C67; // "glTF"
const CHUNK_JSON: u32 = 0x4E4F_534A; // "JSON"
const GLB_HEADER_LEN: u64 = 12;
const CHUNK_HEADER_LEN: u64 = 8;
const MAX_JSON_CHUNK: u32 = 64 * 1024 * 1024;

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Locate the VRM thumbnail image of a GLB container.
///
/// Returns `Ok(None)` when the file is a valid container without a
/// thumbnail, and an error when the container itself is malformed.
pub fn locate_glb_thumbnail(path: &Path) -> Result<Option<ThumbnailDescriptor>> {
    let mut file = File::open(path).map_err(|e| LibraryError::io_with_path(e, path))?;
    let file_len = file
        .metadata()
        .map_err(|e| LibraryError::io_with_path(e, path))?
        .len();

    let mut header = [0u8; (GLB_HEADER_LEN + CHUNK_HEADER_LEN) as usize];
    file.read_exact(&mut header)
        .map_err(|e| LibraryError::io_with_path(e, path))?;
    if read_u32(&header[0..4]) != GLB_MAGIC {
        return Err(LibraryError::io_error(
            Some(path.to_path_buf()),
            "not a binary glTF container",
        ));
    }
    let json_len = read_u32(&header[12..16]);
    if read_u32(&header[16..20]) != CHUNK_JSON || json_len > MAX_JSON_CHUNK {
        return Err(LibraryError::io_error(
            Some(path.to_path_buf()),
            "missing or oversized JSON chunk",
        ));
    }

    let mut json = vec![0u8; json_len as usize];
    file.read_exact(&mut json)
        .map_err(|e| LibraryError::io_with_path(e, path))?;
    let document: Value = serde_json::from_slice(&json)
        .map_err(|e| LibraryError::io_error(Some(path.to_path_buf()), e.to_string()))?;

    let Some(image_index) = thumbnail_image_index(&document) else {
        return Ok(None);
    };
    let Some(image) = document["images"].get(image_index) else {
        return Ok(None);
    };
    let Some(view_index) = image["bufferView"].as_u64() else {
        return Ok(None);
    };
    let view = &document["bufferViews"][view_index as usize];
    // Only the GLB-stored buffer (index 0) lives inside this file
    if view["buffer"].as_u64() != Some(0) {
        return Ok(None);
    }
    let Some(length) = view["byteLength"].as_u64() else {
        return Ok(None);
    };
    let view_offset = view["byteOffset"].as_u64().unwrap_or(0);

    // The binary chunk follows the JSON chunk, which is already 4-byte padded
    let bin_data_start = GLB_HEADER_LEN + CHUNK_HEADER_LEN + json_len as u64 + CHUNK_HEADER_LEN;
    let offset = bin_data_start.checked_add(view_offset);
    let end = offset.and_then(|offset| offset.checked_add(length));
    let (Some(offset), Some(end)) = (offset, end) else {
        return Err(range_error(path));
    };
    if end > file_len {
        return Err(range_error(path));
    }

    Ok(Some(ThumbnailDescriptor {
        offset,
        length,
        mime_type: image["mimeType"].as_str().map(str::to_string),
    }))
}

fn range_error(path: &Path) -> LibraryError {
    LibraryError::io_error(Some(path.to_path_buf()), "thumbnail range exceeds file length")
}

/// VRM 1.0 names the image directly; VRM 0.x names a texture
fn thumbnail_image_index(document: &Value) -> Option<usize> {
    let extensions = &document["extensions"];
    if let Some(image) = extensions["VRMC_vrm"]["meta"]["thumbnailImage"].as_u64() {
        return Some(image as usize);
    }
    let texture = extensions["VRM"]["meta"]["texture"].as_i64()?;
    if texture < 0 {
        return None;
    }
    document["textures"][texture as usize]["source"]
        .as_u64()
        .map(|i| i as usize)
}
