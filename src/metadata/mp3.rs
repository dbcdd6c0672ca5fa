//! MP3 ID3v2.3 metadata.
//!
//! Tag layout:
//!
//! ```text
//! 0  "ID3"   3  version 0x03   4  revision 0x00   5  flags 0x00
//! 6  tag size, 4-byte synchsafe big-endian
//! 10 frames: id(4) + size(4, big-endian) + flags(2) + payload
//! ```
//!
//! Text frames (TPE1, TIT2) hold an encoding byte and ISO-8859-1 text; the
//! COMM frame adds a 3-byte language code and a null-terminated (empty)
//! description before the comment text. Synchsafe sizes keep the MSB of every
//! byte clear so no 0xFF sync pattern can appear inside the size field.

use super::{MetadataError, ProvenanceMetadata};

/// Largest tag expressible in a 4-byte synchsafe integer (28 bits).
const MAX_TAG_SIZE: usize = (1 << 28) - 1;

fn synchsafe_encode(size: u32) -> [u8; 4] {
    [
        ((size >> 21) & 0x7F) as u8,
        ((size >> 14) & 0x7F) as u8,
        ((size >> 7) & 0x7F) as u8,
        (size & 0x7F) as u8,
    ]
}

fn synchsafe_decode(bytes: [u8; 4]) -> u32 {
    (bytes[0] as u32) << 21 | (bytes[1] as u32) << 14 | (bytes[2] as u32) << 7 | bytes[3] as u32
}

/// Prepend an ID3v2.3 tag carrying the given metadata.
///
/// An existing tag is replaced: the true audio start is located past the old
/// tag (verified against the MPEG sync pattern) and the new tag spliced in
/// front of it. Empty metadata returns the input unchanged. Fails closed when
/// the tag would exceed the 28-bit synchsafe limit.
pub fn embed_mp3_metadata(
    data: &[u8],
    meta: &ProvenanceMetadata,
) -> Result<Vec<u8>, MetadataError> {
    let mut frames = Vec::new();
    write_text_frame(&mut frames, b"TPE1", &meta.artist);
    write_text_frame(&mut frames, b"TIT2", &meta.name);
    write_comment_frame(&mut frames, &meta.comment);
    if frames.is_empty() {
        return Ok(data.to_vec());
    }
    if frames.len() > MAX_TAG_SIZE {
        return Err(MetadataError::TagTooLarge(frames.len()));
    }

    let mut header = Vec::with_capacity(10);
    header.extend_from_slice(b"ID3");
    header.push(0x03); // ID3v2.3
    header.push(0x00); // revision
    header.push(0x00); // flags
    header.extend_from_slice(&synchsafe_encode(frames.len() as u32));

    let audio_start = find_mp3_audio_start(data);
    let mut result = Vec::with_capacity(header.len() + frames.len() + data.len() - audio_start);
    result.extend_from_slice(&header);
    result.extend_from_slice(&frames);
    result.extend_from_slice(&data[audio_start..]);
    Ok(result)
}

fn write_text_frame(out: &mut Vec<u8>, id: &[u8; 4], text: &str) {
    if text.is_empty() {
        return;
    }
    let frame_size = (1 + text.len()) as u32; // encoding byte + text
    out.extend_from_slice(id);
    out.extend_from_slice(&frame_size.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // flags
    out.push(0x00); // ISO-8859-1
    out.extend_from_slice(text.as_bytes());
}

fn write_comment_frame(out: &mut Vec<u8>, text: &str) {
    if text.is_empty() {
        return;
    }
    // encoding + language + empty description terminator + text
    let frame_size = (1 + 3 + 1 + text.len()) as u32;
    out.extend_from_slice(b"COMM");
    out.extend_from_slice(&frame_size.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.push(0x00);
    out.extend_from_slice(b"eng");
    out.push(0x00);
    out.extend_from_slice(text.as_bytes());
}

/// Read ID3v2.3 metadata. Anything malformed yields empty metadata.
pub fn read_mp3_metadata(data: &[u8]) -> ProvenanceMetadata {
    let mut meta = ProvenanceMetadata::default();
    if data.len() < 10 || &data[0..3] != b"ID3" || data[3] != 0x03 {
        return meta;
    }

    let tag_size = synchsafe_decode([data[6], data[7], data[8], data[9]]) as usize;
    if data.len() < 10 + tag_size {
        return meta;
    }

    let mut pos = 10;
    let end = 10 + tag_size;
    while pos + 10 <= end {
        let frame_id = &data[pos..pos + 4];
        if frame_id[0] == 0 {
            break; // null padding marks the end of frames
        }
        let frame_size =
            u32::from_be_bytes([data[pos + 4], data[pos + 5], data[pos + 6], data[pos + 7]])
                as usize;
        let flags = u16::from_be_bytes([data[pos + 8], data[pos + 9]]);
        if pos + 10 + frame_size > end || frame_size == 0 {
            break;
        }

        let encoding = data[pos + 10];
        let payload = &data[pos + 11..pos + 10 + frame_size];

        match frame_id {
            b"TPE1" if encoding == 0 && !payload.is_empty() => {
                meta.artist = latin1_text(payload);
            }
            b"TIT2" if encoding == 0 && !payload.is_empty() => {
                meta.name = latin1_text(payload);
            }
            b"COMM" if encoding == 0 && payload.len() > 4 => {
                // language(3) + null-terminated description + text
                match payload[3..].iter().position(|&b| b == 0) {
                    Some(desc_end) => {
                        let text_start = 4 + desc_end;
                        if text_start < payload.len() {
                            meta.comment = latin1_text(&payload[text_start..]);
                        }
                    }
                    None => meta.comment = latin1_text(&payload[3..]),
                }
            }
            _ => {}
        }

        // Unsynchronized frames are not produced by this writer; stop rather
        // than misparse one.
        if flags & 0x40 != 0 {
            break;
        }
        pos += 10 + frame_size;
    }
    meta
}

fn latin1_text(payload: &[u8]) -> String {
    let trimmed: &[u8] = match payload.iter().rposition(|&b| b != 0) {
        Some(last) => &payload[..=last],
        None => &[],
    };
    String::from_utf8_lossy(trimmed).to_string()
}

/// Offset of the first audio byte past any existing ID3v2 tag.
///
/// Falls back to 0 unless the bytes just past the tag carry a valid MPEG
/// sync pattern, so a lying tag size cannot drop audio data.
pub fn find_mp3_audio_start(data: &[u8]) -> usize {
    if data.len() < 10 || &data[0..3] != b"ID3" {
        return 0;
    }
    let tag_size = synchsafe_decode([data[6], data[7], data[8], data[9]]) as usize;
    let audio_start = 10 + tag_size;
    if audio_start + 1 < data.len()
        && data[audio_start] == 0xFF
        && (data[audio_start + 1] & 0xE0) == 0xE0
    {
        return audio_start;
    }
    0
}
