//! WAV LIST/INFO metadata and streamed-header repair.
//!
//! Relevant layout:
//!
//! ```text
//! 0   "RIFF"            8   "WAVE"
//! 4   file size - 8     12  chunks: "fmt ", optional "LIST", "data", ...
//! ```
//!
//! A LIST chunk of type INFO holds even-padded sub-chunks; this module writes
//! IART (artist), INAM (name), and ICMT (comment). The size field of each
//! sub-chunk is the unpadded text length. The LIST chunk is spliced in
//! immediately before the data chunk.
//!
//! Streamed responses arrive with placeholder RIFF/data sizes (0 or
//! 0xFFFFFFFF) because the total length is unknown until the stream ends;
//! [`fix_wav_header`] recomputes both from the actual file length.

use super::ProvenanceMetadata;

/// Minimum plausible WAV: 12-byte prefix + fmt chunk + data chunk header.
const MIN_WAV_LEN: usize = 44;

fn is_wav(data: &[u8]) -> bool {
    data.len() >= MIN_WAV_LEN && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE"
}

/// Splice a LIST/INFO chunk before the data chunk and rewrite the RIFF size.
///
/// Returns the input unchanged when the buffer is not a plausible WAV, the
/// metadata is empty, or no data chunk exists.
pub fn embed_metadata(data: &[u8], meta: &ProvenanceMetadata) -> Vec<u8> {
    if !is_wav(data) {
        return data.to_vec();
    }

    let mut info = Vec::new();
    write_info_chunk(&mut info, b"IART", &meta.artist);
    write_info_chunk(&mut info, b"INAM", &meta.name);
    write_info_chunk(&mut info, b"ICMT", &meta.comment);
    if info.is_empty() {
        return data.to_vec();
    }

    let Some(data_pos) = find_data_chunk_pos(data) else {
        return data.to_vec();
    };

    // Size covers the "INFO" type id plus the sub-chunks.
    let list_size = (4 + info.len()) as u32;
    let mut list = Vec::with_capacity(12 + info.len());
    list.extend_from_slice(b"LIST");
    list.extend_from_slice(&list_size.to_le_bytes());
    list.extend_from_slice(b"INFO");
    list.extend_from_slice(&info);

    let mut result = Vec::with_capacity(data.len() + list.len());
    result.extend_from_slice(&data[..data_pos]);
    result.extend_from_slice(&list);
    result.extend_from_slice(&data[data_pos..]);

    let riff_size = (result.len() - 8) as u32;
    result[4..8].copy_from_slice(&riff_size.to_le_bytes());
    result
}

fn write_info_chunk(out: &mut Vec<u8>, id: &[u8; 4], value: &str) {
    if value.is_empty() {
        return;
    }
    out.extend_from_slice(id);
    // Size is the unpadded length; the payload is even-padded with a NUL.
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
    if value.len() % 2 != 0 {
        out.push(0);
    }
}

/// Read metadata back from a LIST/INFO chunk. Missing or malformed chunks
/// yield empty metadata; metadata is advisory, never load-bearing.
pub fn read_metadata(data: &[u8]) -> ProvenanceMetadata {
    let mut meta = ProvenanceMetadata::default();
    if !is_wav(data) {
        return meta;
    }

    let mut pos = 12;
    while pos + 8 <= data.len() {
        let declared = chunk_size_at(data, pos);
        let chunk_size = declared.min(data.len() - (pos + 8));

        if &data[pos..pos + 4] == b"LIST" && pos + 12 <= data.len() && chunk_size >= 4 {
            if &data[pos + 8..pos + 12] == b"INFO" {
                meta = parse_info_chunk(&data[pos + 12..pos + 8 + chunk_size]);
            }
        }

        pos += 8 + chunk_size;
        if chunk_size % 2 != 0 {
            pos += 1;
        }
    }
    meta
}

fn parse_info_chunk(data: &[u8]) -> ProvenanceMetadata {
    let mut meta = ProvenanceMetadata::default();
    let mut pos = 0;
    while pos + 8 <= data.len() {
        let chunk_size = chunk_size_at(data, pos);
        if pos + 8 + chunk_size > data.len() {
            break;
        }
        let raw = &data[pos + 8..pos + 8 + chunk_size];
        let value = String::from_utf8_lossy(raw)
            .trim_end_matches('\0')
            .to_string();

        match &data[pos..pos + 4] {
            b"IART" => meta.artist = value,
            b"INAM" => meta.name = value,
            b"ICMT" => meta.comment = value,
            _ => {}
        }

        pos += 8 + chunk_size;
        if chunk_size % 2 != 0 {
            pos += 1;
        }
    }
    meta
}

/// Byte offset of the data chunk header, if present.
pub fn find_data_chunk_pos(data: &[u8]) -> Option<usize> {
    if data.len() < 12 {
        return None;
    }
    let mut pos = 12;
    while pos + 8 <= data.len() {
        if &data[pos..pos + 4] == b"data" {
            return Some(pos);
        }
        let chunk_size = chunk_size_at(data, pos).min(data.len() - (pos + 8));
        pos += 8 + chunk_size;
        if chunk_size % 2 != 0 {
            pos += 1;
        }
    }
    None
}

/// Recompute placeholder sizes left by streaming.
///
/// Sets the data chunk size to `file_len - data_header_end` and the RIFF size
/// to `file_len - 8` whenever they disagree. Idempotent; returns the input
/// unchanged when it is not a plausible WAV.
pub fn fix_wav_header(data: &[u8]) -> Vec<u8> {
    if !is_wav(data) {
        return data.to_vec();
    }

    let mut result = data.to_vec();
    let file_size = result.len() as u32;

    let mut pos = 12;
    while pos + 8 <= result.len() {
        if &result[pos..pos + 4] == b"data" {
            let correct_data_size = file_size - (pos as u32 + 8);
            let declared = chunk_size_at(&result, pos) as u32;
            if declared != correct_data_size {
                result[pos + 4..pos + 8].copy_from_slice(&correct_data_size.to_le_bytes());
                result[4..8].copy_from_slice(&(file_size - 8).to_le_bytes());
            }
            return result;
        }
        let chunk_size = chunk_size_at(&result, pos).min(result.len() - (pos + 8));
        pos += 8 + chunk_size;
        if chunk_size % 2 != 0 {
            pos += 1;
        }
    }
    result
}

fn chunk_size_at(data: &[u8], pos: usize) -> usize {
    u32::from_le_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]]) as usize
}
