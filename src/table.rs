//! HTML table → GFM Markdown with rowspan/colspan expansion.
//!
//! The parser emits tables as HTML (`table_body`). Embedding models read
//! pipe tables far better than tag soup, so every table node is converted
//! before embedding. Merged cells are expanded into a rectangular grid: a
//! `colspan="n"` cell is repeated `n` times in its row, and the columns a
//! `rowspan` covers in later rows are filled with empty placeholders.
//!
//! The converter never fails loudly. Input without a `<table>`, or markup
//! the reader cannot tokenize, yields an empty string and a warning.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::borrow::Cow;
use tracing::warn;

/// A cell as read from the markup, before span expansion.
#[derive(Debug, Clone, PartialEq)]
struct RawCell {
    text: String,
    rowspan: usize,
}

/// Convert an HTML table to a Markdown table.
///
/// The first expanded row becomes the header. Returns `""` when no table
/// is found or the markup cannot be read.
pub fn html_table_to_markdown(html: &str) -> String {
    match read_rows(html.trim()) {
        Ok(Some(rows)) => render_markdown(&expand_spans(rows)),
        Ok(None) => {
            warn!("Error parsing table: no <table> found in the HTML");
            String::new()
        }
        Err(e) => {
            warn!("Error parsing table: {}", e);
            String::new()
        }
    }
}

/// Tokenize the first `<table>` into rows of colspan-expanded cells.
///
/// `Ok(None)` means there was no table at all.
fn read_rows(html: &str) -> Result<Option<Vec<Vec<RawCell>>>, quick_xml::Error> {
    let html = escape_bare_lt(html);
    let mut reader = Reader::from_str(&html);
    {
        let config = reader.config_mut();
        config.trim_text(true);
        // HTML is not XML: void elements (<br>) never close and stray end
        // tags are common in parser output.
        config.check_end_names = false;
        config.allow_unmatched_ends = true;
    }

    let mut rows: Vec<Vec<RawCell>> = Vec::new();
    let mut table_depth = 0usize;
    let mut seen_table = false;
    let mut row: Option<Vec<RawCell>> = None;
    // (rowspan, colspan, text fragments) of the open cell
    let mut cell: Option<(usize, usize, Vec<String>)> = None;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => {
                let name = tag_name(e);
                match name.as_str() {
                    "table" => {
                        if seen_table && table_depth == 0 {
                            // Only the first table is converted.
                            break;
                        }
                        seen_table = true;
                        table_depth += 1;
                    }
                    "tr" if table_depth > 0 => {
                        close_cell(&mut cell, &mut row);
                        if let Some(r) = row.take() {
                            rows.push(r);
                        }
                        row = Some(Vec::new());
                    }
                    "td" | "th" if table_depth > 0 => {
                        close_cell(&mut cell, &mut row);
                        if row.is_none() {
                            row = Some(Vec::new());
                        }
                        cell = Some((span_attr(e, b"rowspan"), span_attr(e, b"colspan"), Vec::new()));
                    }
                    _ => {}
                }
            }
            Event::Empty(ref e) if table_depth > 0 => {
                let name = tag_name(e);
                match name.as_str() {
                    "tr" => {
                        close_cell(&mut cell, &mut row);
                        if let Some(r) = row.take() {
                            rows.push(r);
                        }
                        rows.push(Vec::new());
                    }
                    "td" | "th" => {
                        close_cell(&mut cell, &mut row);
                        let r = row.get_or_insert_with(Vec::new);
                        push_cell(r, String::new(), span_attr(e, b"rowspan"), span_attr(e, b"colspan"));
                    }
                    _ => {}
                }
            }
            Event::End(ref e) if table_depth > 0 => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase();
                match name.as_str() {
                    "td" | "th" => close_cell(&mut cell, &mut row),
                    "tr" => {
                        close_cell(&mut cell, &mut row);
                        if let Some(r) = row.take() {
                            rows.push(r);
                        }
                    }
                    "table" => {
                        table_depth -= 1;
                        if table_depth == 0 {
                            close_cell(&mut cell, &mut row);
                            if let Some(r) = row.take() {
                                rows.push(r);
                            }
                            break;
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(ref t) => {
                if let Some((_, _, fragments)) = cell.as_mut() {
                    push_fragment(fragments, &String::from_utf8_lossy(t));
                }
            }
            Event::CData(ref t) => {
                if let Some((_, _, fragments)) = cell.as_mut() {
                    push_fragment(fragments, &String::from_utf8_lossy(t));
                }
            }
            Event::Eof => {
                close_cell(&mut cell, &mut row);
                if let Some(r) = row.take() {
                    rows.push(r);
                }
                break;
            }
            _ => {}
        }
    }

    Ok(seen_table.then_some(rows))
}

/// Escape every `<` that cannot open a tag (`p<0.05`, `< 1`) so the
/// tokenizer reads it as cell text.
fn escape_bare_lt(html: &str) -> Cow<'_, str> {
    let opens_tag = |next: Option<char>| {
        matches!(next, Some(c) if c.is_ascii_alphabetic() || matches!(c, '/' | '!' | '?'))
    };
    let mut chars = html.char_indices().peekable();
    let mut out: Option<String> = None;
    let mut copied = 0;

    while let Some((i, c)) = chars.next() {
        if c == '<' && !opens_tag(chars.peek().map(|&(_, n)| n)) {
            let buf = out.get_or_insert_with(|| String::with_capacity(html.len() + 8));
            buf.push_str(&html[copied..i]);
            buf.push_str("&lt;");
            copied = i + 1;
        }
    }

    match out {
        Some(mut buf) => {
            buf.push_str(&html[copied..]);
            Cow::Owned(buf)
        }
        None => Cow::Borrowed(html),
    }
}

fn tag_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).to_ascii_lowercase()
}

/// Read a span attribute; missing, unparsable or zero values count as 1.
fn span_attr(e: &BytesStart<'_>, key: &[u8]) -> usize {
    e.html_attributes()
        .flatten()
        .find(|a| a.key.as_ref().eq_ignore_ascii_case(key))
        .and_then(|a| String::from_utf8_lossy(&a.value).trim().parse::<usize>().ok())
        .unwrap_or(1)
        .max(1)
}

fn push_fragment(fragments: &mut Vec<String>, raw: &str) {
    let decoded = html_escape::decode_html_entities(raw);
    let trimmed = decoded.trim();
    if !trimmed.is_empty() {
        fragments.push(trimmed.to_string());
    }
}

fn close_cell(cell: &mut Option<(usize, usize, Vec<String>)>, row: &mut Option<Vec<RawCell>>) {
    if let Some((rowspan, colspan, fragments)) = cell.take() {
        let r = row.get_or_insert_with(Vec::new);
        push_cell(r, fragments.concat(), rowspan, colspan);
    }
}

fn push_cell(row: &mut Vec<RawCell>, text: String, rowspan: usize, colspan: usize) {
    for _ in 0..colspan {
        row.push(RawCell {
            text: text.clone(),
            rowspan,
        });
    }
}

/// Expand rowspans into a rectangular grid of strings.
///
/// Columns still covered by a rowspan from an earlier row are emitted as
/// empty placeholders before the row's own cells are placed.
fn expand_spans(rows: Vec<Vec<RawCell>>) -> Vec<Vec<String>> {
    let max_cols = rows.iter().map(Vec::len).max().unwrap_or(0);
    let mut tracker = vec![0usize; max_cols];
    let mut expanded = Vec::with_capacity(rows.len());

    for row in rows {
        let mut out: Vec<String> = Vec::with_capacity(max_cols);
        let mut col = 0usize;

        for cell in row {
            while col < max_cols && tracker[col] > 0 {
                out.push(String::new());
                tracker[col] -= 1;
                col += 1;
            }
            out.push(cell.text);
            if cell.rowspan > 1 && col < max_cols {
                tracker[col] = cell.rowspan - 1;
            }
            col += 1;
        }

        while col < max_cols {
            if tracker[col] > 0 {
                tracker[col] -= 1;
            }
            out.push(String::new());
            col += 1;
        }

        expanded.push(out);
    }

    expanded
}

fn render_markdown(rows: &[Vec<String>]) -> String {
    let Some((header, body)) = rows.split_first() else {
        return String::new();
    };

    let mut md = String::new();
    if !header.is_empty() {
        md.push_str(&format!("| {} |\n", header.join(" | ")));
        let dashes: Vec<String> = header
            .iter()
            .map(|h| {
                let n = h.chars().count();
                "-".repeat(if n == 0 { 3 } else { n })
            })
            .collect();
        md.push_str(&format!("| {} |\n", dashes.join(" | ")));
    }
    for row in body {
        md.push_str(&format!("| {} |\n", row.join(" | ")));
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_table() {
        let html = "<table><tr><th>Model</th><th>AIME</th></tr><tr><td>R1</td><td>79.8</td></tr></table>";
        assert_eq!(
            html_table_to_markdown(html),
            "| Model | AIME |\n| ----- | ---- |\n| R1 | 79.8 |\n"
        );
    }

    #[test]
    fn colspan_repeats_cell_text() {
        let html = r#"<table><tr><td colspan="2">Score</td></tr><tr><td>a</td><td>b</td></tr></table>"#;
        assert_eq!(
            html_table_to_markdown(html),
            "| Score | Score |\n| ----- | ----- |\n| a | b |\n"
        );
    }

    #[test]
    fn rowspan_leaves_placeholder_in_later_rows() {
        let html = r#"<table>
            <tr><td rowspan="2">Math</td><td>AIME</td></tr>
            <tr><td>MATH-500</td></tr>
            <tr><td>Code</td><td>LiveCodeBench</td></tr>
        </table>"#;
        assert_eq!(
            html_table_to_markdown(html),
            "| Math | AIME |\n| ---- | ---- |\n|  | MATH-500 |\n| Code | LiveCodeBench |\n"
        );
    }

    #[test]
    fn rowspan_in_middle_column() {
        let html = r#"<table>
            <tr><td>a</td><td rowspan="3">m</td><td>c</td></tr>
            <tr><td>d</td><td>f</td></tr>
            <tr><td>g</td><td>i</td></tr>
        </table>"#;
        let md = html_table_to_markdown(html);
        let lines: Vec<&str> = md.lines().collect();
        assert_eq!(lines[2], "| d |  | f |");
        assert_eq!(lines[3], "| g |  | i |");
    }

    #[test]
    fn empty_header_cells_get_three_dashes() {
        let html = "<table><tr><td></td><td>x</td></tr></table>";
        assert_eq!(html_table_to_markdown(html), "|  | x |\n| --- | - |\n");
    }

    #[test]
    fn short_rows_are_padded() {
        let html = "<table><tr><td>a</td><td>b</td><td>c</td></tr><tr><td>1</td></tr></table>";
        let md = html_table_to_markdown(html);
        assert!(md.ends_with("| 1 |  |  |\n"), "got: {md}");
    }

    #[test]
    fn nested_markup_text_is_concatenated_and_entities_decoded() {
        let html = "<table><tr><td><b> Top </b>-<i>1</i></td><td>a &amp; b</td></tr></table>";
        assert_eq!(html_table_to_markdown(html), "| Top-1 | a & b |\n| ----- | ----- |\n");
    }

    #[test]
    fn html_wrapper_and_void_elements_are_tolerated() {
        let html = "<html><body><table><tr><td>line<br>break</td></tr></table></body></html>";
        assert_eq!(html_table_to_markdown(html), "| linebreak |\n| --------- |\n");
    }

    #[test]
    fn unquoted_and_invalid_spans() {
        let html = "<table><tr><td colspan=2>x</td><td rowspan=abc>y</td></tr></table>";
        assert_eq!(html_table_to_markdown(html), "| x | x | y |\n| - | - | - |\n");
    }

    #[test]
    fn missing_table_yields_empty_string() {
        assert_eq!(html_table_to_markdown("<div>no table here</div>"), "");
        assert_eq!(html_table_to_markdown(""), "");
    }

    #[test]
    fn table_without_rows_yields_empty_string() {
        assert_eq!(html_table_to_markdown("<table></table>"), "");
    }

    #[test]
    fn only_first_table_is_converted() {
        let html = "<table><tr><td>first</td></tr></table><table><tr><td>second</td></tr></table>";
        let md = html_table_to_markdown(html);
        assert!(md.contains("first"));
        assert!(!md.contains("second"));
    }

    #[test]
    fn bare_less_than_stays_in_the_cell() {
        let html = "<table><tr><td>p<0.05</td><td>x</td></tr></table>";
        assert_eq!(html_table_to_markdown(html), "| p<0.05 | x |\n| ------ | - |\n");

        let html = "<table><tr><th>p</th></tr><tr><td><0.001</td></tr><tr><td>a < b</td></tr></table>";
        assert_eq!(
            html_table_to_markdown(html),
            "| p |\n| - |\n| <0.001 |\n| a < b |\n"
        );
    }

    #[test]
    fn escape_bare_lt_leaves_tags_alone() {
        assert!(matches!(escape_bare_lt("<td>a</td><!-- c -->"), Cow::Borrowed(_)));
        assert_eq!(escape_bare_lt("<td>1<2</td>"), "<td>1&lt;2</td>");
        assert_eq!(escape_bare_lt("x<"), "x&lt;");
    }

    #[test]
    fn unclosed_cells_are_closed_by_the_next_cell_or_row() {
        let html = "<table><tr><td>a<td>b</tr><tr><td>c<td>d</table>";
        assert_eq!(html_table_to_markdown(html), "| a | b |\n| - | - |\n| c | d |\n");
    }

    #[test]
    fn truncated_markup_keeps_what_was_read() {
        let html = "<table><tr><td>a</td><td>b";
        assert_eq!(html_table_to_markdown(html), "| a | b |\n| - | - |\n");
    }

    #[test]
    fn expand_spans_handles_overflowing_rowspan() {
        // A row that is already full when a rowspan is still pending must not
        // index past the grid.
        let rows = vec![
            vec![
                RawCell { text: "a".into(), rowspan: 3 },
                RawCell { text: "b".into(), rowspan: 1 },
            ],
            vec![
                RawCell { text: "c".into(), rowspan: 1 },
                RawCell { text: "d".into(), rowspan: 1 },
            ],
        ];
        let grid = expand_spans(rows);
        assert_eq!(grid[1], vec!["".to_string(), "c".into(), "d".into()]);
    }
}
