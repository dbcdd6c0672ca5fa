//! Provenance metadata embedded in saved audio files.
//!
//! WAV files carry a LIST/INFO chunk, MP3 files an ID3v2.3 tag; both store
//! the same three fields. The comment field uses a canonical grammar,
//! `[speaker-modelId-lang]: text`, so a saved file can later reproduce its
//! own transcript.

pub mod mp3;
pub mod wav;

use crate::audio::{sniff_format, SniffedFormat};
use thiserror::Error;

/// Artist string written into every saved file.
pub const ARTIST: &str = "Vox TTS";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("ID3 tag too large: {0} bytes exceeds the 28-bit synchsafe limit")]
    TagTooLarge(usize),
}

/// The three provenance fields stored in either container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvenanceMetadata {
    /// Producing tool (IART / TPE1).
    pub artist: String,
    /// Display title (INAM / TIT2).
    pub name: String,
    /// Canonical comment, `[speaker-modelId-lang]: text` (ICMT / COMM).
    pub comment: String,
}

impl ProvenanceMetadata {
    pub fn is_empty(&self) -> bool {
        self.artist.is_empty() && self.name.is_empty() && self.comment.is_empty()
    }
}

/// Fields recovered from a canonical comment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedComment {
    pub speaker: String,
    pub model_id: String,
    pub language: String,
    pub text: String,
}

/// Render the canonical comment grammar.
pub fn format_comment(speaker: &str, model_id: &str, lang: &str, text: &str) -> String {
    format!("[{speaker}-{model_id}-{lang}]: {text}")
}

/// Parse `[speaker-modelId-lang]: text`.
///
/// Speaker and model id cannot contain `-`; the language cannot contain `]`.
/// Returns `None` on any deviation from the grammar.
pub fn parse_comment(comment: &str) -> Option<ParsedComment> {
    let rest = comment.strip_prefix('[')?;
    let bracket = rest.find(']')?;
    let (tag, after) = rest.split_at(bracket);

    let mut parts = tag.splitn(3, '-');
    let speaker = parts.next()?;
    let model_id = parts.next()?;
    let language = parts.next()?;
    if speaker.is_empty() || model_id.is_empty() || language.is_empty() {
        return None;
    }

    let text = after.strip_prefix("]:")?.trim_start();
    if text.is_empty() {
        return None;
    }

    Some(ParsedComment {
        speaker: speaker.to_string(),
        model_id: model_id.to_string(),
        language: language.to_string(),
        text: text.to_string(),
    })
}

/// Read whichever metadata family the buffer's format calls for and parse
/// its comment. Returns `None` when no valid canonical comment is present.
pub fn parsed_comment_from_file(data: &[u8]) -> Option<ParsedComment> {
    let comment = match sniff_format(data) {
        SniffedFormat::Mp3 => mp3::read_mp3_metadata(data).comment,
        _ => wav::read_metadata(data).comment,
    };
    if comment.is_empty() {
        return None;
    }
    parse_comment(&comment)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_comment_canonical() {
        let parsed = parse_comment("[celeste-arcana-eng]: Hello world").unwrap();
        assert_eq!(parsed.speaker, "celeste");
        assert_eq!(parsed.model_id, "arcana");
        assert_eq!(parsed.language, "eng");
        assert_eq!(parsed.text, "Hello world");
    }

    #[test]
    fn test_parse_comment_lang_may_contain_dash() {
        let parsed = parse_comment("[ana-mist-pt-br]: Olá").unwrap();
        assert_eq!(parsed.speaker, "ana");
        assert_eq!(parsed.model_id, "mist");
        assert_eq!(parsed.language, "pt-br");
        assert_eq!(parsed.text, "Olá");
    }

    #[test]
    fn test_parse_comment_rejects_malformed() {
        assert!(parse_comment("").is_none());
        assert!(parse_comment("no brackets at all").is_none());
        assert!(parse_comment("[only-two]: text").is_none());
        assert!(parse_comment("[a-b-c] missing colon").is_none());
        assert!(parse_comment("[a-b-c]: ").is_none());
        assert!(parse_comment("[-b-c]: text").is_none());
    }

    #[test]
    fn test_format_comment_round_trips() {
        let comment = format_comment("celeste", "arcana", "eng", "The quick brown fox");
        let parsed = parse_comment(&comment).unwrap();
        assert_eq!(parsed.speaker, "celeste");
        assert_eq!(parsed.text, "The quick brown fox");
    }
}
