//! Download response headers

use axum::body::Body;
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::StatusCode;
use axum::response::Response;

const NO_STORE: &str = "private, no-store, no-transform";
const EXPOSED: &str = "Content-Disposition, Content-Length";

/// Printable ASCII version of `name` for the plain `filename` parameter.
pub fn ascii_fallback(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            ' '..='~' => c,
            _ => '_',
        })
        .collect();
    if fallback.trim().is_empty() {
        "download".into()
    } else {
        fallback
    }
}

/// RFC 5987 `value-chars` encoding of the UTF-8 bytes of `name`.
fn ext_value(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        match b {
            b'a'..=b'z'
            | b'A'..=b'Z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'&'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

pub fn content_disposition(name: &str) -> String {
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii_fallback(name),
        ext_value(name)
    )
}

/// 200 response streaming `body` as a file download.
pub fn attachment(body: Body, content_type: &'static str, filename: &str) -> Response {
    let disposition = HeaderValue::from_str(&content_disposition(filename))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

    let headers: [(HeaderName, HeaderValue); 8] = [
        (header::CONTENT_TYPE, HeaderValue::from_static(content_type)),
        (header::CONTENT_DISPOSITION, disposition),
        (header::CACHE_CONTROL, HeaderValue::from_static(NO_STORE)),
        (header::PRAGMA, HeaderValue::from_static("no-cache")),
        (header::EXPIRES, HeaderValue::from_static("0")),
        (header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff")),
        (header::ACCEPT_RANGES, HeaderValue::from_static("none")),
        (header::ACCESS_CONTROL_EXPOSE_HEADERS, HeaderValue::from_static(EXPOSED)),
    ];

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    response.headers_mut().extend(headers);
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_ascii_name() {
        assert_eq!(
            content_disposition("report.pdf.enc"),
            "attachment; filename=\"report.pdf.enc\"; filename*=UTF-8''report.pdf.enc"
        );
    }

    #[test]
    fn test_unicode_name_gets_fallback_and_encoding() {
        let value = content_disposition("Übersicht 2024.pdf");
        assert!(value.contains("filename=\"_bersicht 2024.pdf\""));
        assert!(value.contains("filename*=UTF-8''%C3%9Cbersicht%202024.pdf"));
    }

    #[test]
    fn test_quotes_cannot_break_out() {
        assert_eq!(ascii_fallback("a\"b\\c"), "a_b_c");
        assert_eq!(ascii_fallback("日本"), "__");
        assert_eq!(ascii_fallback(""), "download");
    }

    #[test]
    fn test_attachment_headers() {
        let resp = attachment(Body::empty(), "application/zip", "x.zip");
        let h = resp.headers();
        assert_eq!(h[header::CONTENT_TYPE], "application/zip");
        assert_eq!(h[header::CACHE_CONTROL], NO_STORE);
        assert_eq!(h[header::X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(h[header::ACCEPT_RANGES], "none");
        assert_eq!(h[header::PRAGMA], "no-cache");
    }
}
