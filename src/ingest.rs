//! The ingest normalizer (spec.md §4.6): pure functions turning an
//! NWWS-OI `<x>` stanza payload into NOAAPort framing, then a [`Product`].
//!
//! This has no state of its own — it's the code sequence the XMPP session
//! runs between receiving a groupchat stanza and publishing the resulting
//! `product.received` event (or counting a `message.failed`).

use crate::error::ParseError;
use crate::product::{Product, ProductParser};

/// Builds the NOAAPort frame spec.md §4.3.4/§6.1 describes: leading `0x01`,
/// every `\n\n` rewritten to `\r\r\n`, a trailing `\r\r\n` if not already
/// present, then a trailing `0x03`.
pub fn to_noaaport_frame(x_text: &str) -> Vec<u8> {
    let mut body = x_text.replace("\n\n", "\r\r\n");
    if !body.ends_with("\r\r\n") {
        body.push_str("\r\r\n");
    }

    let mut framed = Vec::with_capacity(body.len() + 2);
    framed.push(0x01);
    framed.extend_from_slice(body.as_bytes());
    framed.push(0x03);
    framed
}

/// Turns a groupchat stanza's `<x>` text and `<body>` text into a
/// [`Product`], or a [`ParseError`] if the parser rejects it or the result
/// fails validation (§4.2).
pub fn normalize(
    parser: &dyn ProductParser,
    x_text: &str,
    subject: String,
) -> Result<Product, ParseError> {
    let frame = to_noaaport_frame(x_text);
    let raw = parser.parse(&frame)?;
    Product::from_raw(raw, subject)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_blank_lines_and_terminates() {
        let frame = to_noaaport_frame("WFUS54 KOUN 251200\n\nTORKOUN\n\n.BODY.");
        assert_eq!(frame[0], 0x01);
        assert_eq!(*frame.last().unwrap(), 0x03);
        let inner = String::from_utf8(frame[1..frame.len() - 1].to_vec()).unwrap();
        assert_eq!(inner, "WFUS54 KOUN 251200\r\r\nTORKOUN\r\r\n.BODY.\r\r\n");
    }

    #[test]
    fn leaves_existing_terminator_alone() {
        let frame = to_noaaport_frame("WFUS54 KOUN 251200\r\r\n");
        let inner = String::from_utf8(frame[1..frame.len() - 1].to_vec()).unwrap();
        assert_eq!(inner, "WFUS54 KOUN 251200\r\r\n");
    }

    #[test]
    fn normalize_drops_on_parse_failure() {
        use crate::product::DefaultProductParser;
        let err = normalize(&DefaultProductParser, "garbage", String::new()).unwrap_err();
        assert_eq!(err.kind(), "malformed_framing");
    }
}
