//! Upload encoding detection.
//!
//! Branch exports arrive as UTF-8 or as a legacy Cyrillic code page.
//! A byte order mark wins, valid UTF-8 is taken as is, and anything else
//! goes to `chardetng`. Decoding never fails: malformed sequences become
//! U+FFFD.

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};
use tracing::debug;

/// Decoded upload text.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedUpload {
    pub text: String,
    /// WHATWG label of the encoding used, e.g. "windows-1251"
    pub encoding: &'static str,
    /// Some byte sequences were invalid and replaced
    pub had_errors: bool,
}

/// Best guess of the encoding of `bytes`. Falls back to UTF-8.
pub fn detect_encoding(bytes: &[u8]) -> &'static Encoding {
    if bytes.is_empty() {
        return UTF_8;
    }
    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return encoding;
    }
    if bytes.is_ascii() || std::str::from_utf8(bytes).is_ok() {
        return UTF_8;
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    detector.guess(None, true)
}

/// Detect the encoding of an upload and decode it.
pub fn decode_upload(bytes: &[u8]) -> DecodedUpload {
    let encoding = detect_encoding(bytes);
    // `decode` strips a BOM and may switch to the encoding it names
    let (text, used, had_errors) = encoding.decode(bytes);
    debug!(
        encoding = used.name(),
        bytes = bytes.len(),
        had_errors,
        "Decoded upload"
    );
    DecodedUpload {
        text: text.into_owned(),
        encoding: used.name(),
        had_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::WINDOWS_1251;

    const RUSSIAN_EXPORT: &str = "Аспирин ТАБЛ. 500мг №10;Байер;Германия;АБ12;10,50;2;21,00;31.12.2025;Лексредства;15.01.2024\n\
        Парацетамол таблетки для взрослых и детей;Фармстандарт;Россия;ПР-77;3,20;15;48,00;01.06.2026;Лексредства;15.01.2024\n\
        Мазь Вишневского для наружного применения;Тверская фармацевтическая фабрика;Россия;МВ-1;5,75;4;23,00;01.03.2027;Лексредства;15.01.2024\n";

    #[test]
    fn test_empty_input_is_utf8() {
        assert_eq!(detect_encoding(b""), UTF_8);
        let decoded = decode_upload(b"");
        assert_eq!(decoded.text, "");
        assert_eq!(decoded.encoding, "UTF-8");
    }

    #[test]
    fn test_utf8_passes_through() {
        let decoded = decode_upload(RUSSIAN_EXPORT.as_bytes());
        assert_eq!(decoded.encoding, "UTF-8");
        assert_eq!(decoded.text, RUSSIAN_EXPORT);
        assert!(!decoded.had_errors);
    }

    #[test]
    fn test_utf8_bom_is_stripped() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("Аспирин;Байер".as_bytes());
        let decoded = decode_upload(&bytes);
        assert_eq!(decoded.encoding, "UTF-8");
        assert_eq!(decoded.text, "Аспирин;Байер");
    }

    #[test]
    fn test_windows_1251_detected() {
        let (bytes, _, _) = WINDOWS_1251.encode(RUSSIAN_EXPORT);
        assert_eq!(detect_encoding(&bytes), WINDOWS_1251);
        let decoded = decode_upload(&bytes);
        assert_eq!(decoded.encoding, "windows-1251");
        assert_eq!(decoded.text, RUSSIAN_EXPORT);
    }

    #[test]
    fn test_ascii_is_utf8() {
        assert_eq!(detect_encoding(b"aspirin;bayer;1,5"), UTF_8);
    }
}
