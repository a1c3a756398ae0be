// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use axum::http::HeaderMap;

use super::*;

fn headers_with_range(value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Range", value.parse().expect("header"));
    headers
}

#[test]
fn range_absent_is_ok_none() {
    assert_eq!(parse_range(&HeaderMap::new()), Ok(None));
}

#[test]
fn range_with_start_and_end() {
    let headers = headers_with_range("bytes=100-199");
    assert_eq!(parse_range(&headers), Ok(Some((100, Some(199)))));
}

#[test]
fn range_with_open_end() {
    let headers = headers_with_range("bytes=4096-");
    assert_eq!(parse_range(&headers), Ok(Some((4096, None))));
}

#[test]
fn range_rejects_bad_unit_and_multi_ranges() {
    assert_eq!(parse_range(&headers_with_range("chunks=0-100")), Err(()));
    assert_eq!(parse_range(&headers_with_range("bytes=0-100,200-300")), Err(()));
    assert_eq!(parse_range(&headers_with_range("bytes=abc-100")), Err(()));
    assert_eq!(parse_range(&headers_with_range("bytes=200-100")), Err(()));
}

#[test]
fn download_head_sets_206_and_content_range() {
    let mut src = HeaderMap::new();
    src.insert("FileSize", "1000".parse().expect("header"));
    src.insert("FileName", "x".parse().expect("header"));

    let files = vec!["/tmp/x".to_owned()];
    let head = download_head(&src, &files, false, Some((100, Some(199))));
    assert_eq!(head.status, StatusCode::PARTIAL_CONTENT);
    assert_eq!(
        head.headers.get("Content-Range").and_then(|v| v.to_str().ok()),
        Some("bytes 100-199/1000")
    );
    let disposition =
        head.headers.get("Content-Disposition").and_then(|v| v.to_str().ok()).unwrap_or("");
    assert!(disposition.contains("filename=\"x\""));
}

#[test]
fn download_head_synthesizes_open_ended_range_from_file_size() {
    let mut src = HeaderMap::new();
    src.insert("FileSize", "1000".parse().expect("header"));

    let files = vec!["/tmp/x".to_owned()];
    let head = download_head(&src, &files, false, Some((100, None)));
    assert_eq!(
        head.headers.get("Content-Range").and_then(|v| v.to_str().ok()),
        Some("bytes 100-999/1000")
    );
}

#[test]
fn download_head_multi_file_falls_back_to_archive_name() {
    let src = HeaderMap::new();
    let files = vec!["/a".to_owned(), "/b".to_owned()];
    let head = download_head(&src, &files, false, None);
    assert_eq!(head.status, StatusCode::OK);
    assert_eq!(
        head.headers.get("Accept-Ranges").and_then(|v| v.to_str().ok()),
        Some("none")
    );
    let disposition =
        head.headers.get("Content-Disposition").and_then(|v| v.to_str().ok()).unwrap_or("");
    assert!(disposition.contains("Archive.zip"));
}

#[test]
fn download_head_preview_skips_attachment_headers() {
    let src = HeaderMap::new();
    let files = vec!["/tmp/report.pdf".to_owned()];
    let head = download_head(&src, &files, true, None);
    assert!(head.headers.get("Content-Disposition").is_none());
    assert!(head.headers.get("Content-Type").is_none());
}

#[test]
fn basename_handles_windows_separators() {
    assert_eq!(basename("C:\\Users\\ops\\notes.txt"), "notes.txt");
    assert_eq!(basename("/var/log/syslog"), "syslog");
    assert_eq!(basename("plain"), "plain");
}

#[test]
fn attachment_escapes_non_ascii_names() {
    let value = attachment("отчёт.txt");
    assert!(value.starts_with("attachment; filename=\"отчёт.txt\""));
    assert!(value.contains("filename*=UTF-8''%D0%BE"));
}

#[test]
fn percent_escape_keeps_unreserved_ascii() {
    assert_eq!(percent_escape("abc-123_x.y~"), "abc-123_x.y~");
    assert_eq!(percent_escape("a b"), "a%20b");
}
