// tests/ingest_parser.rs
use chronicle_ingest::event::event_id;
use chronicle_ingest::ingest::parser::parse_tsv;

#[test]
fn rejects_bad_dates_and_urls_but_keeps_good_rows() {
    let tsv = "date\turl\n\
               2024-13-40\thttps://a.test/x\n\
               2024-01-01\tnot-a-url\n\
               24-01-01\thttps://a.test/short\n\
               2024-02-30\thttps://a.test/feb\n\
               2024-01-02\thttps://a.test/ok\n";
    let out = parse_tsv(tsv, "mixed.tsv");
    assert_eq!(out.errors, 4);
    assert!(!out.header_error);
    assert_eq!(out.rows.len(), 1);
    assert_eq!(out.rows[0].line, 6);
    assert_eq!(out.rows[0].id(), event_id("2024-01-02", "https://a.test/ok"));
}

#[test]
fn windows_line_endings_and_bom_are_tolerated() {
    let tsv = "\u{feff}Date\tURL\tTitle\r\n1969-07-20\thttps://a.test/moon\tMoon\r\n";
    let out = parse_tsv(tsv, "crlf.tsv");
    assert_eq!(out.errors, 0);
    assert_eq!(out.rows.len(), 1);
    assert_eq!(out.rows[0].url, "https://a.test/moon");
    assert_eq!(out.rows[0].explicit_title(), Some("Moon"));
}

#[test]
fn empty_file_is_a_header_error() {
    let out = parse_tsv("", "empty.tsv");
    assert!(out.header_error);
    assert!(out.rows.is_empty());
}
