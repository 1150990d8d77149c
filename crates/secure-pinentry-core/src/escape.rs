//! Percent escapes used on the command line protocol.
//!
//! Command arguments carry `%HH` escapes for bytes that cannot appear on a
//! line. Decoding is lenient: a `%` that is not followed by two hex digits is
//! kept as-is. Data lines sent back to the caller escape only the bytes that
//! would break line framing.

/// Decode `%HH` escapes in `input`.
///
/// # Examples
///
/// ```
/// use secure_pinentry_core::escape::percent_decode;
///
/// assert_eq!(percent_decode(b"Enter%20PIN"), b"Enter PIN");
/// assert_eq!(percent_decode(b"100%"), b"100%");
/// assert_eq!(percent_decode(b"%zz"), b"%zz");
/// ```
pub fn percent_decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    decode_into(input, &mut out);
    out
}

/// Decode `%HH` escapes in `input`, appending to `out`.
///
/// Appends at most `input.len()` bytes, so callers can reserve that much up
/// front and never reallocate.
pub fn decode_into(input: &[u8], out: &mut Vec<u8>) {
    let mut i = 0;
    while i < input.len() {
        if input[i] == b'%' && i + 2 < input.len() {
            if let (Some(hi), Some(lo)) = (hex_value(input[i + 1]), hex_value(input[i + 2])) {
                out.push(hi << 4 | lo);
                i += 3;
                continue;
            }
        }
        out.push(input[i]);
        i += 1;
    }
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Whether `byte` must be escaped inside a `D` line.
pub fn needs_data_escape(byte: u8) -> bool {
    matches!(byte, b'%' | b'\r' | b'\n')
}

/// Escape sequence for a byte that [`needs_data_escape`].
pub fn data_escape(byte: u8) -> [u8; 3] {
    const HEX: &[u8; 16] = b"0123456789ABCDEF";
    [b'%', HEX[usize::from(byte >> 4)], HEX[usize::from(byte & 0x0f)]]
}
