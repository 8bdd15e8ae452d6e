//! The product record exposed to sinks, and the contract for the external
//! NWS text product parser.
//!
//! The parser itself (a third-party library that turns NOAAPort-framed
//! bytes into a structured product) is an external collaborator — see
//! `spec.md` §4.2. This module defines the contract ([`ProductParser`],
//! [`RawProduct`]) and the [`DefaultProductParser`] used when no richer
//! parser is wired in, plus the [`Product`] record the rest of the crate
//! depends on.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use serde::Serialize;

use crate::error::ParseError;

/// A parsed NWS text product, adapted into the core's own record shape.
///
/// Immutable once constructed. Not persisted by the core; sinks may persist
/// independently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    /// Stable composite ID: issuer + WMO + AFOS + valid time. Non-empty.
    pub product_id: String,
    /// Four-character issuing office / center code (CCCC).
    pub source: String,
    /// AFOS PIL, at least 3 characters (`"unknown"` if the parser's value
    /// was shorter).
    pub afos: String,
    /// Six-character WMO TTAAII header.
    pub wmo_header: String,
    /// UTC instant of product validity.
    pub issue_time: DateTime<Utc>,
    /// Free-text subject line, taken from the stanza's `<body>`, not the
    /// parser. May be empty.
    pub subject: String,
    /// Canonical JSON serialization of the structured product: UTF-8, keys
    /// sorted, default-valued fields elided. Deterministic.
    pub body_json: String,
}

impl Product {
    /// Adapt a parser's [`RawProduct`] plus the stanza subject into a
    /// [`Product`], applying the validation rules from §4.2.
    pub fn from_raw(raw: RawProduct, subject: String) -> Result<Self, ParseError> {
        if raw.product_id.is_empty() {
            return Err(ParseError::MissingProductId);
        }

        let afos = if raw.afos.len() >= 3 {
            raw.afos.clone()
        } else {
            "unknown".to_string()
        };

        let body_json = raw.to_canonical_json();

        Ok(Product {
            product_id: raw.product_id,
            source: raw.source,
            afos,
            wmo_header: raw.wmo,
            issue_time: raw.issue_time,
            subject,
            body_json,
        })
    }

    /// First three characters of `afos`, used as the MQTT channel key.
    pub fn channel(&self) -> &str {
        &self.afos[..3.min(self.afos.len())]
    }
}

/// The shape an external parser must return: everything the core needs to
/// build a [`Product`], before subject and validation are applied.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RawProduct {
    pub source: String,
    pub afos: String,
    pub wmo: String,
    pub product_id: String,
    pub issue_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub segments: Vec<String>,
}

impl RawProduct {
    /// Deterministic canonical JSON: same input produces byte-identical
    /// output, keys sorted, default-valued fields elided.
    ///
    /// Relies on `serde_json`'s default (non-`preserve_order`) map
    /// representation, which sorts object keys.
    pub fn to_canonical_json(&self) -> String {
        let value = serde_json::to_value(self).expect("RawProduct always serializes");
        serde_json::to_string(&value).expect("serde_json::Value always serializes")
    }
}

/// The external collaborator: turns NOAAPort-framed bytes into a
/// [`RawProduct`], or fails with a [`ParseError`].
pub trait ProductParser: Send + Sync {
    fn parse(&self, noaaport: &[u8]) -> Result<RawProduct, ParseError>;
}

/// A minimal parser good enough to drive the ingest path end to end: reads
/// the WMO header line (`TTAAII CCCC DDHHMM`) and, if present, the AFOS PIL
/// line that conventionally follows it.
///
/// Real deployments are expected to wire in a full NWS text product parser;
/// this default exists so the crate is runnable without one and so tests
/// have a concrete, dependency-free implementation to exercise.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultProductParser;

impl ProductParser for DefaultProductParser {
    fn parse(&self, noaaport: &[u8]) -> Result<RawProduct, ParseError> {
        let inner = strip_framing(noaaport)?;
        let text = String::from_utf8_lossy(inner);

        let mut lines = text.split("\r\r\n").map(str::trim).filter(|l| !l.is_empty());

        let header = lines.next().ok_or(ParseError::MalformedFraming)?;
        let mut header_parts = header.split_whitespace();
        let wmo = header_parts.next().ok_or(ParseError::MalformedFraming)?;
        let source = header_parts.next().ok_or(ParseError::MalformedFraming)?;
        let ddhhmm = header_parts.next().ok_or(ParseError::MalformedFraming)?;

        if wmo.len() != 6 || source.len() != 4 || ddhhmm.len() != 6 {
            return Err(ParseError::MalformedFraming);
        }

        let issue_time = parse_ddhhmm(ddhhmm).ok_or(ParseError::MalformedFraming)?;

        let afos = lines.next().unwrap_or("").split_whitespace().next().unwrap_or("");

        let product_id = format!(
            "{}-{}-{}-{}",
            source,
            wmo,
            if afos.is_empty() { "unknown" } else { afos },
            issue_time.format("%Y%m%dT%H%MZ")
        );

        let segments: Vec<String> = lines.map(str::to_string).collect();

        Ok(RawProduct {
            source: source.to_string(),
            afos: afos.to_string(),
            wmo: wmo.to_string(),
            product_id,
            issue_time,
            segments,
        })
    }
}

/// Strips the leading `0x01` and trailing `0x03` NOAAPort framing bytes.
fn strip_framing(noaaport: &[u8]) -> Result<&[u8], ParseError> {
    let inner = noaaport.strip_prefix(&[0x01]).ok_or(ParseError::MalformedFraming)?;
    let inner = inner.strip_suffix(&[0x03]).ok_or(ParseError::MalformedFraming)?;
    Ok(inner)
}

/// Interprets a `DDHHMM` timestamp against the current UTC month, as NOAAPort
/// headers omit the year and month.
fn parse_ddhhmm(ddhhmm: &str) -> Option<DateTime<Utc>> {
    let day: u32 = ddhhmm[0..2].parse().ok()?;
    let hour: u32 = ddhhmm[2..4].parse().ok()?;
    let minute: u32 = ddhhmm[4..6].parse().ok()?;

    let now = Utc::now();
    Utc.with_ymd_and_hms(now.year(), now.month(), day, hour, minute, 0)
        .single()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body: &str) -> Vec<u8> {
        let mut bytes = vec![0x01];
        bytes.extend_from_slice(body.as_bytes());
        if !body.ends_with("\r\r\n") {
            bytes.extend_from_slice(b"\r\r\n");
        }
        bytes.push(0x03);
        bytes
    }

    #[test]
    fn parses_header_and_afos() {
        let parser = DefaultProductParser;
        let bytes = frame("WFUS54 KOUN 251200\r\r\nTORKOUN\r\r\n.TEST BODY.\r\r\n");
        let raw = parser.parse(&bytes).expect("parses");
        assert_eq!(raw.source, "KOUN");
        assert_eq!(raw.wmo, "WFUS54");
        assert_eq!(raw.afos, "TORKOUN");
        assert!(!raw.product_id.is_empty());
        assert_eq!(raw.segments, vec![".TEST BODY.".to_string()]);
    }

    #[test]
    fn rejects_garbage() {
        let parser = DefaultProductParser;
        let bytes = frame("garbage");
        assert!(parser.parse(&bytes).is_err());
    }

    #[test]
    fn missing_product_id_is_rejected_by_product() {
        let raw = RawProduct {
            source: "KOUN".into(),
            afos: "TOROUN".into(),
            wmo: "WFUS54".into(),
            product_id: String::new(),
            issue_time: Utc::now(),
            segments: vec![],
        };
        assert_eq!(
            Product::from_raw(raw, String::new()).unwrap_err(),
            ParseError::MissingProductId
        );
    }

    #[test]
    fn short_afos_becomes_unknown() {
        let raw = RawProduct {
            source: "KOUN".into(),
            afos: "TO".into(),
            wmo: "WFUS54".into(),
            product_id: "x".into(),
            issue_time: Utc::now(),
            segments: vec![],
        };
        let product = Product::from_raw(raw, String::new()).unwrap();
        assert_eq!(product.afos, "unknown");
        assert!(product.afos.len() >= 3);
    }

    #[test]
    fn canonical_json_is_deterministic() {
        let raw = RawProduct {
            source: "KOUN".into(),
            afos: "TOROUN".into(),
            wmo: "WFUS54".into(),
            product_id: "p".into(),
            issue_time: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            segments: vec![],
        };
        let a = raw.to_canonical_json();
        let b = raw.clone().to_canonical_json();
        assert_eq!(a, b);
        assert!(a.find("\"afos\"").unwrap() < a.find("\"wmo\"").unwrap());
    }
}
