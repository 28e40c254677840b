// src/ingest/parser.rs
//! Tab-separated source parsing. The header names the columns; `date` and
//! `url` are required, `image`, `title` and `lang` are optional.

use metrics::counter;

use crate::event::{parse_date, DEFAULT_LANG};

/// One validated data line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRow {
    pub date: String,
    pub url: String,
    pub image: Option<String>,
    pub title: Option<String>,
    pub lang: String,
    /// 1-based; the header is line 1.
    pub line: usize,
}

impl SourceRow {
    pub fn id(&self) -> String {
        crate::event::event_id(&self.date, &self.url)
    }

    pub fn explicit_title(&self) -> Option<&str> {
        non_blank(self.title.as_deref())
    }

    pub fn explicit_image(&self) -> Option<&str> {
        non_blank(self.image.as_deref())
    }
}

pub(crate) fn non_blank(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParseOutcome {
    pub rows: Vec<SourceRow>,
    pub errors: usize,
    /// Set when the header itself is unusable; `rows` is empty then.
    pub header_error: bool,
}

struct Columns {
    date: usize,
    url: usize,
    image: Option<usize>,
    title: Option<usize>,
    lang: Option<usize>,
}

impl Columns {
    fn from_header(line: &str) -> Option<Self> {
        let names: Vec<String> = line
            .split('\t')
            .map(|h| h.trim().trim_start_matches('\u{feff}').to_ascii_lowercase())
            .collect();
        let find = |n: &str| names.iter().position(|h| h == n);
        Some(Self {
            date: find("date")?,
            url: find("url")?,
            image: find("image"),
            title: find("title"),
            lang: find("lang"),
        })
    }
}

fn valid_date(s: &str) -> bool {
    s.len() == 10 && parse_date(s).is_some()
}

/// Parse raw TSV text. Bad lines are counted and skipped, never fatal.
pub fn parse_tsv(text: &str, file_name: &str) -> ParseOutcome {
    let mut out = ParseOutcome::default();
    let mut lines = text.lines();

    let header = lines.next().unwrap_or_default();
    let Some(cols) = Columns::from_header(header) else {
        tracing::warn!(target: "ingest", file = file_name, "header lacks date/url columns");
        counter!("ingest_parse_errors_total").increment(1);
        out.errors = 1;
        out.header_error = true;
        return out;
    };

    for (idx, raw) in lines.enumerate() {
        let line_no = idx + 2;
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split('\t').collect();
        let get = |i: usize| fields.get(i).map(|s| s.trim()).unwrap_or_default();
        let get_opt = |i: Option<usize>| i.map(get).filter(|s| !s.is_empty()).map(str::to_string);

        let date = get(cols.date);
        let url = get(cols.url);

        if !valid_date(date) {
            tracing::warn!(target: "ingest", file = file_name, line = line_no, date, "bad date");
            out.errors += 1;
            continue;
        }
        if !url.starts_with("http") {
            tracing::warn!(target: "ingest", file = file_name, line = line_no, url, "bad url");
            out.errors += 1;
            continue;
        }

        out.rows.push(SourceRow {
            date: date.to_string(),
            url: url.to_string(),
            image: get_opt(cols.image),
            title: get_opt(cols.title),
            lang: get_opt(cols.lang).unwrap_or_else(|| DEFAULT_LANG.to_string()),
            line: line_no,
        });
    }

    counter!("ingest_rows_total").increment(out.rows.len() as u64);
    if out.errors > 0 {
        counter!("ingest_parse_errors_total").increment(out.errors as u64);
    }
    out
}
