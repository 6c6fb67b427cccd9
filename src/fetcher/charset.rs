//! Decoding fetched bytes to text.
//!
//! Encodings are tried in order: the declared charset, GBK, UTF-8, then
//! windows-1252. The first one that decodes without malformed sequences wins.

use std::borrow::Cow;

use encoding_rs::{Encoding, GBK, UTF_8, WINDOWS_1252};
use tracing::{debug, warn};

use crate::app::{BookruleError, Result};

/// Bytes scanned for a `<meta charset>` declaration.
const META_SCAN_LIMIT: usize = 2048;

/// Pick the declared charset: explicit, then `Content-Type`, then an HTML
/// `<meta>` tag near the start of the body.
pub fn declared_charset(
    explicit: Option<&str>,
    content_type: Option<&str>,
    body: &[u8],
) -> Option<String> {
    explicit
        .map(str::to_string)
        .or_else(|| content_type.and_then(charset_param))
        .or_else(|| meta_charset(body))
}

/// Decode `bytes`, returning the text and the name of the encoding used.
pub fn decode(bytes: &[u8], declared: Option<&str>) -> Result<(String, &'static str)> {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        if let Some(text) = encoding.decode_without_bom_handling_and_without_replacement(&bytes[bom_len..]) {
            return Ok((text.into_owned(), encoding.name()));
        }
    }

    // No declaration means UTF-8.
    let declared = match declared {
        Some(label) => {
            let encoding = Encoding::for_label(label.trim().as_bytes());
            if encoding.is_none() {
                warn!(charset = label, "unknown declared charset");
            }
            encoding
        }
        None => Some(UTF_8),
    };

    let ladder = declared
        .into_iter()
        .chain([GBK, UTF_8, WINDOWS_1252]);

    for encoding in ladder {
        if let Some(text) = try_decode(encoding, bytes) {
            if Some(encoding) != declared {
                debug!(encoding = encoding.name(), "decoded with fallback charset");
            }
            return Ok((text.into_owned(), encoding.name()));
        }
    }

    Err(BookruleError::Decode(format!(
        "no charset could decode {} bytes",
        bytes.len()
    )))
}

fn try_decode<'a>(encoding: &'static Encoding, bytes: &'a [u8]) -> Option<Cow<'a, str>> {
    encoding.decode_without_bom_handling_and_without_replacement(bytes)
}

fn charset_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(['"', '\'']).to_string())
            .filter(|value| !value.is_empty())
    })
}

fn meta_charset(body: &[u8]) -> Option<String> {
    let head = &body[..body.len().min(META_SCAN_LIMIT)];
    let head = String::from_utf8_lossy(head).to_ascii_lowercase();
    let start = head.find("charset=")? + "charset=".len();
    let value: String = head[start..]
        .trim_start_matches(['"', '\''])
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_declared() {
        let (text, encoding) = decode("你好".as_bytes(), Some("utf-8")).unwrap();
        assert_eq!(text, "你好");
        assert_eq!(encoding, "UTF-8");
    }

    #[test]
    fn test_gbk_fallback_when_declared_fails() {
        let (bytes, _, _) = GBK.encode("三体");
        let (text, encoding) = decode(&bytes, Some("utf-8")).unwrap();
        assert_eq!(text, "三体");
        assert_eq!(encoding, "GBK");
    }

    #[test]
    fn test_declared_gbk() {
        let (bytes, _, _) = GBK.encode("章节");
        let (text, _) = decode(&bytes, Some("gb2312")).unwrap();
        assert_eq!(text, "章节");
    }

    #[test]
    fn test_single_byte_last_resort() {
        // 0x80 alone is invalid in both GBK and UTF-8
        let (text, encoding) = decode(b"caf\xe9 \x80", None).unwrap();
        assert_eq!(encoding, "windows-1252");
        assert_eq!(text, "café €");
    }

    #[test]
    fn test_bom_wins() {
        let mut bytes = vec![0xEF, 0xBB, 0xBF];
        bytes.extend_from_slice("ok".as_bytes());
        let (text, encoding) = decode(&bytes, Some("gbk")).unwrap();
        assert_eq!(text, "ok");
        assert_eq!(encoding, "UTF-8");
    }

    #[test]
    fn test_undeclared_prefers_utf8() {
        let (text, encoding) = decode("你好".as_bytes(), None).unwrap();
        assert_eq!(text, "你好");
        assert_eq!(encoding, "UTF-8");
    }

    #[test]
    fn test_unknown_label_is_skipped() {
        let (text, _) = decode(b"plain", Some("no-such-charset")).unwrap();
        assert_eq!(text, "plain");
    }

    #[test]
    fn test_declared_charset_sources() {
        assert_eq!(
            declared_charset(Some("big5"), Some("text/html; charset=gbk"), b""),
            Some("big5".to_string())
        );
        assert_eq!(
            declared_charset(None, Some("text/html; Charset=\"GBK\""), b""),
            Some("GBK".to_string())
        );
        assert_eq!(
            declared_charset(None, Some("text/html"), b"<meta charset=\"gb2312\">"),
            Some("gb2312".to_string())
        );
        assert_eq!(
            declared_charset(
                None,
                None,
                b"<meta http-equiv=\"Content-Type\" content=\"text/html; charset=gbk\">"
            ),
            Some("gbk".to_string())
        );
        assert_eq!(declared_charset(None, None, b"<p>x</p>"), None);
    }
}
