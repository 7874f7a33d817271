//! Markdown Report Generator
//!
//! Renders a session as a flat transcript: one section per entry, in
//! document order.

use crate::session::{HeaderMap, SessionEntry};

/// Generate Markdown report
pub fn generate(session_name: &str, entries: &[SessionEntry]) -> String {
    let mut md = String::new();

    md.push_str(&format!("# Session Log: {}\n\n", session_name));

    for entry in entries {
        match entry {
            SessionEntry::Request(request) => {
                md.push_str(&heading("Request", Some(&request.request_id)));
                md.push_str(&format!("**Time:** {}\n\n", request.timestamp));
                md.push_str(&code_span(&format!("{} {}", request.method, request.url)));
                md.push_str("\n\n");
                push_headers(&mut md, request.headers.as_ref());
                push_body(&mut md, request.body.as_deref());
            }
            SessionEntry::Response(response) => {
                md.push_str(&heading("Response", response.request_id.as_deref()));
                md.push_str(&format!("**Time:** {}\n\n", response.timestamp));
                md.push_str(&format!("**Status:** {}\n\n", response.status_code));
                push_headers(&mut md, response.headers.as_ref());
                push_body(&mut md, response.body.as_deref());
            }
        }
        md.push_str("---\n\n");
    }

    md
}

fn heading(kind: &str, request_id: Option<&str>) -> String {
    match request_id {
        Some(id) if !id.is_empty() => format!("## {} {}\n", kind, id),
        _ => format!("## {}\n", kind),
    }
}

fn push_headers(md: &mut String, headers: Option<&HeaderMap>) {
    let Some(headers) = headers.filter(|h| !h.is_empty()) else {
        return;
    };

    md.push_str("### Headers\n");
    md.push_str("| Key | Value |\n| --- | --- |\n");
    for (key, value) in headers {
        md.push_str(&format!("| {} | {} |\n", table_cell(key), table_cell(value)));
    }
    md.push('\n');
}

fn push_body(md: &mut String, body: Option<&str>) {
    let Some(body) = body.filter(|b| !b.is_empty()) else {
        return;
    };

    let fence = backticks(longest_backtick_run(body).max(2) + 1);
    md.push_str("### Body\n");
    md.push_str(&format!("{}\n{}\n{}\n\n", fence, body, fence));
}

/// Escape a value for a single table cell
fn table_cell(value: &str) -> String {
    value
        .replace('|', "\\|")
        .replace("\r\n", " ")
        .replace(['\r', '\n'], " ")
}

/// Inline code span that survives backticks in the content
fn code_span(text: &str) -> String {
    let run = longest_backtick_run(text);
    if run == 0 {
        return format!("`{}`", text);
    }

    let ticks = backticks(run + 1);
    format!("{} {} {}", ticks, text, ticks)
}

fn longest_backtick_run(text: &str) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for c in text.chars() {
        if c == '`' {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

fn backticks(n: usize) -> String {
    "`".repeat(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{RequestRecord, ResponseRecord};
    use crate::session::SessionEntry;
    use serde_json::json;

    fn at(secs: u32) -> String {
        format!("2025-01-02T03:04:{:02}Z", secs)
    }

    fn request() -> RequestRecord {
        RequestRecord {
            timestamp: at(5),
            method: "GET".to_string(),
            url: "http://example.com/".to_string(),
            headers: None,
            body: None,
            request_id: "17".to_string(),
        }
    }

    fn response() -> ResponseRecord {
        ResponseRecord {
            timestamp: at(6),
            status_code: 200,
            headers: None,
            body: Some("ok".to_string()),
            request_id: Some("17".to_string()),
        }
    }

    #[test]
    fn test_sections_in_order() {
        let entries = vec![request().into(), response().into()];
        let md = generate("session_20250102_030405.json", &entries);

        let expected = "# Session Log: session_20250102_030405.json\n\n\
            ## Request 17\n**Time:** 2025-01-02T03:04:05Z\n\n`GET http://example.com/`\n\n---\n\n\
            ## Response 17\n**Time:** 2025-01-02T03:04:06Z\n\n**Status:** 200\n\n\
            ### Body\n```\nok\n```\n\n---\n\n";
        assert_eq!(md, expected);
    }

    #[test]
    fn test_header_table_escapes_pipes() {
        let mut record = request();
        record.headers = Some(HeaderMap::from([
            ("accept".to_string(), "a|b".to_string()),
            ("host".to_string(), "example.com".to_string()),
        ]));

        let md = generate("s.json", &[record.into()]);
        assert!(md.contains("### Headers\n| Key | Value |\n| --- | --- |\n"));
        assert!(md.contains("| accept | a\\|b |\n| host | example.com |\n\n"));
    }

    #[test]
    fn test_empty_body_and_headers_are_omitted() {
        let mut record = response();
        record.body = Some(String::new());
        record.headers = Some(HeaderMap::new());

        let md = generate("s.json", &[record.into()]);
        assert!(!md.contains("### Body"));
        assert!(!md.contains("### Headers"));
    }

    #[test]
    fn test_fence_outgrows_body_backticks() {
        let mut record = response();
        record.body = Some("before\n```\ninside\n```\nafter".to_string());

        let md = generate("s.json", &[record.into()]);
        assert!(md.contains("### Body\n````\nbefore"));
        assert!(md.contains("after\n````\n\n"));
    }

    #[test]
    fn test_response_without_id() {
        let mut record = response();
        record.request_id = None;

        let md = generate("s.json", &[record.into()]);
        assert!(md.contains("## Response\n**Time:**"));
    }

    #[test]
    fn test_timestamp_shown_as_recorded() {
        let mut record = request();
        record.timestamp = "2025-01-02T03:04:05.120+02:00".to_string();

        let md = generate("s.json", &[record.into()]);
        assert!(md.contains("**Time:** 2025-01-02T03:04:05.120+02:00\n\n"));
    }

    #[test]
    fn test_incomplete_entries_still_render() {
        let entries: Vec<SessionEntry> = [
            json!({"type": "request", "data": {"timestamp": "2025-01-02 03:04:05", "method": "GET"}}),
            json!({"type": "response", "data": {"status_code": 404}}),
        ]
        .into_iter()
        .filter_map(SessionEntry::from_value)
        .collect();
        assert_eq!(entries.len(), 2);

        let md = generate("s.json", &entries);
        assert!(md.contains("## Request\n**Time:** 2025-01-02 03:04:05\n\n`GET `\n\n"));
        assert!(md.contains("## Response\n**Time:** \n\n**Status:** 404\n\n"));
        assert_eq!(md.matches("---\n\n").count(), 2);
    }

    #[test]
    fn test_code_span_with_backtick() {
        assert_eq!(code_span("GET /a"), "`GET /a`");
        assert_eq!(code_span("GET /a`b"), "`` GET /a`b ``");
    }
}
