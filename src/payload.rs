//! Fixed wire payloads.
//!
//! The exchange carries no framing: one side writes one fixed blob, the
//! other accumulates bytes until end of stream. Text is encoded one byte
//! per character in both directions.

/// Agent advertised by the client request unless configured otherwise.
pub const DEFAULT_USER_AGENT: &str = "curl/7.43.0";

/// Text the server writes to every accepted connection unless configured otherwise.
pub const DEFAULT_RESPONSE: &str = "GET / HTTP/1.1\r\nUser-Agent: curl/7.43.0\r\nAccept: */*\r\n\r\n";

/// Builds the client request sent once a connection is established.
pub fn request(host: &str, user_agent: &str) -> Vec<u8> {
    encode(&format!(
        "GET / HTTP/1.1\r\nHost: {host}\r\nUser-Agent: {user_agent}\r\nAccept: */*\r\n\r\n"
    ))
}

/// Encodes text one byte per character.
///
/// Characters outside the single-byte range are replaced with `?`.
pub fn encode(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
        .collect()
}

/// Decodes bytes one character per byte (ISO-8859-1).
///
/// Every byte sequence decodes, so a chunk boundary can never split a character.
pub fn decode(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| char::from(b)).collect()
}
