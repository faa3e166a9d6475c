//! WebSocket upgrade handshake (RFC 6455 §4.2).
//!
//! The frame codec lives in its own layer; this module only covers what the
//! upgrade bridge needs: recognizing a well-formed upgrade request, deriving
//! the `Sec-WebSocket-Accept` value, and producing the `101 Switching
//! Protocols` bytes. SHA-1 and base64 are implemented here rather than
//! pulled in as dependencies — the handshake is their only consumer.

use crate::request::HttpRequest;

/// Key-derivation GUID fixed by RFC 6455 §4.2.2.
const HANDSHAKE_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Extract the `Sec-WebSocket-Key` from a valid upgrade request.
///
/// Checks method `GET`, an `Upgrade` header containing `websocket`, a
/// `Connection` header containing `upgrade`, version `13`, and a non-empty
/// key. Returns `None` when any check fails; the caller then treats the
/// request as plain HTTP.
#[must_use]
pub fn upgrade_request_key(request: &HttpRequest) -> Option<String> {
    if !request.method().eq_ignore_ascii_case("GET") {
        return None;
    }
    let has_token = |header: &str, token: &str| {
        request
            .headers()
            .get_str(header)
            .is_some_and(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case(token)))
    };
    if !has_token("upgrade", "websocket") || !has_token("connection", "upgrade") {
        return None;
    }
    if request
        .headers()
        .get_str("sec-websocket-version")
        .map(str::trim)
        != Some("13")
    {
        return None;
    }
    let key = request.headers().get_str("sec-websocket-key")?.trim();
    if key.is_empty() {
        return None;
    }
    Some(key.to_string())
}

/// Derive the `Sec-WebSocket-Accept` value for a client key.
#[must_use]
pub fn accept_key(client_key: &str) -> String {
    let handshake = format!("{}{HANDSHAKE_GUID}", client_key.trim());
    base64(&sha1(handshake.as_bytes()))
}

/// The `101 Switching Protocols` response completing the handshake.
#[must_use]
pub fn switching_protocols_response(client_key: &str) -> Vec<u8> {
    let accept = accept_key(client_key);
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {accept}\r\n\r\n"
    )
    .into_bytes()
}

/// SHA-1 (RFC 3174), sufficient for the handshake digest.
///
/// Streams whole 64-byte blocks straight from the input; only the tail is
/// copied for padding.
fn sha1(message: &[u8]) -> [u8; 20] {
    let mut state: [u32; 5] = [
        0x6745_2301,
        0xEFCD_AB89,
        0x98BA_DCFE,
        0x1032_5476,
        0xC3D2_E1F0,
    ];

    let whole = message.len() - message.len() % 64;
    for block in message[..whole].chunks_exact(64) {
        sha1_block(&mut state, block);
    }

    let mut tail = Vec::with_capacity(128);
    tail.extend_from_slice(&message[whole..]);
    tail.push(0x80);
    while tail.len() % 64 != 56 {
        tail.push(0);
    }
    tail.extend_from_slice(&((message.len() as u64) * 8).to_be_bytes());
    for block in tail.chunks_exact(64) {
        sha1_block(&mut state, block);
    }

    let mut digest = [0u8; 20];
    for (out, word) in digest.chunks_exact_mut(4).zip(state) {
        out.copy_from_slice(&word.to_be_bytes());
    }
    digest
}

/// One 512-bit compression round.
#[allow(clippy::many_single_char_names)]
fn sha1_block(state: &mut [u32; 5], block: &[u8]) {
    let mut schedule = [0u32; 80];
    for (i, word) in block.chunks_exact(4).enumerate() {
        schedule[i] = u32::from_be_bytes([word[0], word[1], word[2], word[3]]);
    }
    for i in 16..80 {
        schedule[i] =
            (schedule[i - 3] ^ schedule[i - 8] ^ schedule[i - 14] ^ schedule[i - 16])
                .rotate_left(1);
    }

    let [mut a, mut b, mut c, mut d, mut e] = *state;
    for (i, &word) in schedule.iter().enumerate() {
        let (mix, round_key) = match i / 20 {
            0 => ((b & c) | (!b & d), 0x5A82_7999),
            1 => (b ^ c ^ d, 0x6ED9_EBA1),
            2 => ((b & c) | (b & d) | (c & d), 0x8F1B_BCDC),
            _ => (b ^ c ^ d, 0xCA62_C1D6),
        };
        let next = a
            .rotate_left(5)
            .wrapping_add(mix)
            .wrapping_add(e)
            .wrapping_add(round_key)
            .wrapping_add(word);
        e = d;
        d = c;
        c = b.rotate_left(30);
        b = a;
        a = next;
    }

    state[0] = state[0].wrapping_add(a);
    state[1] = state[1].wrapping_add(b);
    state[2] = state[2].wrapping_add(c);
    state[3] = state[3].wrapping_add(d);
    state[4] = state[4].wrapping_add(e);
}

const B64_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// Base64 per RFC 4648: each 3-byte group becomes a 24-bit word read out as
/// four 6-bit alphabet slots, `=`-padded when the group is short.
fn base64(data: &[u8]) -> String {
    let mut encoded = String::with_capacity(data.len().div_ceil(3) * 4);
    for group in data.chunks(3) {
        let mut word = 0u32;
        for (i, &byte) in group.iter().enumerate() {
            word |= u32::from(byte) << (16 - 8 * i);
        }
        for slot in 0..4 {
            if slot <= group.len() {
                let index = (word >> (18 - 6 * slot)) & 0x3F;
                encoded.push(char::from(B64_ALPHABET[index as usize]));
            } else {
                encoded.push('=');
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{Headers, HttpVersion};

    fn upgrade_request(version: &str, method: &str) -> HttpRequest {
        let mut headers = Headers::new();
        headers.insert("Upgrade", b"websocket".to_vec());
        headers.insert("Connection", b"keep-alive, Upgrade".to_vec());
        headers.insert("Sec-WebSocket-Key", b"dGhlIHNhbXBsZSBub25jZQ==".to_vec());
        headers.insert("Sec-WebSocket-Version", version.as_bytes().to_vec());
        HttpRequest::new(
            method.to_string(),
            "/ws".to_string(),
            None,
            HttpVersion::Http11,
            headers,
        )
    }

    #[test]
    fn rfc_sample_accept_key() {
        // the worked example from RFC 6455 §1.3
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn base64_pads_short_groups() {
        assert_eq!(base64(b""), "");
        assert_eq!(base64(b"f"), "Zg==");
        assert_eq!(base64(b"fo"), "Zm8=");
        assert_eq!(base64(b"foo"), "Zm9v");
        assert_eq!(base64(b"foobar"), "Zm9vYmFy");
    }

    #[test]
    fn sha1_known_vectors() {
        // RFC 3174 test cases 1 and 2
        assert_eq!(
            base64(&sha1(b"abc")),
            base64(&[
                0xA9, 0x99, 0x3E, 0x36, 0x47, 0x06, 0x81, 0x6A, 0xBA, 0x3E, 0x25, 0x71, 0x78,
                0x50, 0xC2, 0x6C, 0x9C, 0xD0, 0xD8, 0x9D,
            ])
        );
        assert_eq!(
            base64(&sha1(b"abcdbcdecdefdefgefghfghighijhijkijkljklmklmnlmnomnopnopq")),
            base64(&[
                0x84, 0x98, 0x3E, 0x44, 0x1C, 0x3B, 0xD2, 0x6E, 0xBA, 0xAE, 0x4A, 0xA1, 0xF9,
                0x51, 0x29, 0xE5, 0xE5, 0x46, 0x70, 0xF1,
            ])
        );
    }

    #[test]
    fn valid_upgrade_request_yields_key() {
        let request = upgrade_request("13", "GET");
        assert_eq!(
            upgrade_request_key(&request).as_deref(),
            Some("dGhlIHNhbXBsZSBub25jZQ==")
        );
    }

    #[test]
    fn wrong_method_or_version_is_rejected() {
        assert!(upgrade_request_key(&upgrade_request("13", "POST")).is_none());
        assert!(upgrade_request_key(&upgrade_request("8", "GET")).is_none());
    }

    #[test]
    fn plain_request_is_not_an_upgrade() {
        let request = HttpRequest::new(
            "GET".to_string(),
            "/ws".to_string(),
            None,
            HttpVersion::Http11,
            Headers::new(),
        );
        assert!(upgrade_request_key(&request).is_none());
    }

    #[test]
    fn switching_protocols_bytes_are_complete() {
        let bytes = switching_protocols_response("dGhlIHNhbXBsZSBub25jZQ==");
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(text.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }
}
