//! Conversion between the caller's locale encoding and UTF-8.
//!
//! UTF-8 is the canonical encoding for everything exchanged over the
//! protocol. Interaction providers may need text in the encoding of the
//! terminal or display they present on, which the caller declares with the
//! `lc-ctype` option.
//!
//! An encoding can be named either by a charset label (`ISO-8859-1`) or by a
//! locale name (`de_DE.ISO-8859-1@euro`), in which case the codeset part is
//! used. Conversions are strict: an invalid byte sequence or a character the
//! target encoding cannot represent fails the whole conversion.
//!
//! Output storage is sized for the worst case before converting, so the
//! converted text is written exactly once. With a [`SecureMemory`] handle the
//! output lands in a [`SecureBuffer`], which is how a secret typed in the
//! terminal's encoding reaches UTF-8 without touching ordinary memory.
//!
//! ISO-8859-1 is mapped byte for byte onto U+0000..=U+00FF. The WHATWG
//! tables behind `encoding_rs` treat that label as windows-1252, which would
//! turn 0x80..=0x9F into punctuation.

use encoding_rs::{DecoderResult, Encoding, EncoderResult, UTF_8};
use thiserror::Error;

use crate::secmem::{SecMemError, SecureBuffer, SecureMemory};

/// Errors that can occur during text conversion.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The encoding name could not be resolved.
    #[error("unsupported encoding: {0}")]
    UnsupportedEncoding(String),

    /// The input is not valid in its source encoding.
    #[error("invalid byte sequence for {0}")]
    InvalidSequence(&'static str),

    /// A character has no representation in the target encoding.
    #[error("character cannot be represented in {0}")]
    Unmappable(&'static str),

    /// The worst-case output size overflows.
    #[error("text too large to convert")]
    TooLarge,

    /// Plain memory for the output could not be allocated.
    #[error("out of memory")]
    OutOfMemory,

    /// Secure memory for the output could not be allocated.
    #[error(transparent)]
    SecureMemory(#[from] SecMemError),
}

/// Converted text, held in plain or secure memory.
#[derive(Debug)]
pub enum CodecOutput {
    /// Ordinary heap memory.
    Plain(Vec<u8>),
    /// Locked, zero-on-drop memory.
    Secure(SecureBuffer),
}

impl CodecOutput {
    /// The converted bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            CodecOutput::Plain(bytes) => bytes,
            CodecOutput::Secure(buffer) => buffer.as_bytes(),
        }
    }

    /// Whether the output lives in secure memory.
    pub fn is_secure(&self) -> bool {
        matches!(self, CodecOutput::Secure(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Charset {
    Utf8,
    Ascii,
    Latin1,
    Table(&'static Encoding),
}

/// Extract the codeset from a locale name.
///
/// `lang_TERRITORY.codeset@modifier` yields `codeset`; the `C` and `POSIX`
/// locales yield `ANSI_X3.4-1968`. Anything else is returned unchanged so a
/// bare charset label passes through.
///
/// ```
/// use secure_pinentry_core::codec::locale_codeset;
///
/// assert_eq!(locale_codeset("de_DE.ISO-8859-1@euro"), "ISO-8859-1");
/// assert_eq!(locale_codeset("en_US.UTF-8"), "UTF-8");
/// assert_eq!(locale_codeset("C"), "ANSI_X3.4-1968");
/// assert_eq!(locale_codeset("KOI8-R"), "KOI8-R");
/// ```
pub fn locale_codeset(locale: &str) -> &str {
    let locale = locale.trim();
    if locale == "C" || locale == "POSIX" {
        return "ANSI_X3.4-1968";
    }

    match locale.split_once('.') {
        Some((_, rest)) => rest.split('@').next().unwrap_or(rest),
        None => locale,
    }
}

fn resolve(name: &str) -> Result<Charset, CodecError> {
    let codeset = locale_codeset(name);
    let lowered = codeset.to_ascii_lowercase();

    if matches!(
        lowered.as_str(),
        "ansi_x3.4-1968" | "us-ascii" | "ascii" | "646" | "iso646-us"
    ) {
        return Ok(Charset::Ascii);
    }

    if matches!(
        lowered.as_str(),
        "iso-8859-1"
            | "iso8859-1"
            | "iso_8859-1"
            | "iso88591"
            | "iso_8859-1:1987"
            | "latin1"
            | "l1"
            | "iso-ir-100"
            | "cp819"
            | "ibm819"
            | "csisolatin1"
    ) {
        return Ok(Charset::Latin1);
    }

    let encoding = Encoding::for_label(lowered.as_bytes())
        .ok_or_else(|| CodecError::UnsupportedEncoding(codeset.to_string()))?;

    if encoding == UTF_8 {
        Ok(Charset::Utf8)
    } else if encoding.output_encoding() != encoding {
        // UTF-16 and the replacement encoding cannot be produced
        Err(CodecError::UnsupportedEncoding(codeset.to_string()))
    } else {
        Ok(Charset::Table(encoding))
    }
}

/// Convert `text` from the named encoding to UTF-8.
///
/// With no encoding the text is assumed to be UTF-8 already and is copied
/// unchanged. When `secure` is given, the result is allocated from that pool.
pub fn to_canonical(
    encoding: Option<&str>,
    text: &[u8],
    secure: Option<&SecureMemory>,
) -> Result<CodecOutput, CodecError> {
    let Some(name) = encoding else {
        return copy_into(text, secure);
    };

    match resolve(name)? {
        Charset::Utf8 => {
            std::str::from_utf8(text).map_err(|_| CodecError::InvalidSequence("UTF-8"))?;
            copy_into(text, secure)
        }
        Charset::Ascii => {
            if !text.is_ascii() {
                return Err(CodecError::InvalidSequence("US-ASCII"));
            }
            copy_into(text, secure)
        }
        Charset::Latin1 => {
            let capacity = text.len().checked_mul(2).ok_or(CodecError::TooLarge)?;
            fill_output(capacity, secure, |dst| {
                let mut written = 0;
                for &byte in text {
                    written += char::from(byte).encode_utf8(&mut dst[written..]).len();
                }
                Ok(written)
            })
        }
        Charset::Table(source) => {
            let mut decoder = source.new_decoder_without_bom_handling();
            let capacity = decoder
                .max_utf8_buffer_length_without_replacement(text.len())
                .ok_or(CodecError::TooLarge)?;

            fill_output(capacity, secure, |dst| {
                let (result, read, written) =
                    decoder.decode_to_utf8_without_replacement(text, dst, true);
                match result {
                    DecoderResult::InputEmpty if read == text.len() => Ok(written),
                    _ => Err(CodecError::InvalidSequence(source.name())),
                }
            })
        }
    }
}

/// Convert UTF-8 `text` to the encoding named by `encoding`.
///
/// `encoding` may be a locale name; its codeset selects the target encoding.
/// With no encoding the text is copied unchanged. When `secure` is given,
/// the result is allocated from that pool.
pub fn from_canonical(
    encoding: Option<&str>,
    text: &[u8],
    secure: Option<&SecureMemory>,
) -> Result<CodecOutput, CodecError> {
    let Some(name) = encoding else {
        return copy_into(text, secure);
    };

    let charset = resolve(name)?;
    let text = std::str::from_utf8(text).map_err(|_| CodecError::InvalidSequence("UTF-8"))?;

    match charset {
        Charset::Utf8 => copy_into(text.as_bytes(), secure),
        Charset::Ascii => {
            if !text.is_ascii() {
                return Err(CodecError::Unmappable("US-ASCII"));
            }
            copy_into(text.as_bytes(), secure)
        }
        Charset::Latin1 => fill_output(text.len(), secure, |dst| {
            let mut written = 0;
            for ch in text.chars() {
                dst[written] =
                    u8::try_from(u32::from(ch)).map_err(|_| CodecError::Unmappable("ISO-8859-1"))?;
                written += 1;
            }
            Ok(written)
        }),
        Charset::Table(target) => {
            let mut encoder = target.new_encoder();
            let capacity = encoder
                .max_buffer_length_from_utf8_without_replacement(text.len())
                .ok_or(CodecError::TooLarge)?;

            fill_output(capacity, secure, |dst| {
                let (result, read, written) =
                    encoder.encode_from_utf8_without_replacement(text, dst, true);
                match result {
                    EncoderResult::InputEmpty if read == text.len() => Ok(written),
                    EncoderResult::Unmappable(_) => Err(CodecError::Unmappable(target.name())),
                    _ => Err(CodecError::TooLarge),
                }
            })
        }
    }
}

fn copy_into(text: &[u8], secure: Option<&SecureMemory>) -> Result<CodecOutput, CodecError> {
    fill_output(text.len(), secure, |dst| {
        dst[..text.len()].copy_from_slice(text);
        Ok(text.len())
    })
}

/// Allocate `capacity` bytes, let `fill` write into them and keep only the
/// part it reports as used.
fn fill_output<F>(
    capacity: usize,
    secure: Option<&SecureMemory>,
    fill: F,
) -> Result<CodecOutput, CodecError>
where
    F: FnOnce(&mut [u8]) -> Result<usize, CodecError>,
{
    match secure {
        Some(memory) => {
            let mut buffer = memory.allocate(capacity)?;
            let used = fill(buffer.storage_mut())?;
            buffer.set_len(used)?;
            Ok(CodecOutput::Secure(buffer))
        }
        None => fill_plain(capacity, fill).map(CodecOutput::Plain),
    }
}

fn fill_plain<F>(capacity: usize, fill: F) -> Result<Vec<u8>, CodecError>
where
    F: FnOnce(&mut [u8]) -> Result<usize, CodecError>,
{
    let mut storage = Vec::new();
    storage
        .try_reserve_exact(capacity)
        .map_err(|_| CodecError::OutOfMemory)?;
    storage.resize(capacity, 0);
    let used = fill(&mut storage)?;
    storage.truncate(used);
    Ok(storage)
}
