use std::collections::HashMap;

use chrono::{DateTime, FixedOffset};
use google_gmail1::api::{Message, MessagePart, MessagePartBody};
use serde::Serialize;

/// A Gmail message flattened out of its MIME tree: headers resolved, the
/// first text/plain part (or html stripped to text) as the body, attachments
/// collected from any part carrying a filename.
#[derive(Debug, Clone, Default)]
pub struct ParsedEmail {
    pub gmail_id: String,
    pub thread_id: String,
    pub subject: String,
    pub sender: String,
    pub recipients_to: String,
    pub recipients_cc: String,
    pub recipients_bcc: String,
    pub date: Option<DateTime<FixedOffset>>,
    pub snippet: String,
    pub body_text: String,
    pub body_html: String,
    pub list_unsubscribe: String,
    pub size_estimate: i64,
    pub is_read: bool,
    pub is_starred: bool,
    pub is_draft: bool,
    pub has_attachments: bool,
    pub history_id: String,
    pub label_ids: Vec<String>,
    pub attachments: Vec<EmailAttachment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmailAttachment {
    pub attachment_id: String,
    pub filename: String,
    pub mime_type: String,
    pub size: i64,
}

pub fn parse_headers(payload: Option<&MessagePart>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(headers) = payload.and_then(|p| p.headers.as_ref()) {
        for h in headers {
            if let (Some(name), Some(value)) = (&h.name, &h.value) {
                map.insert(name.clone(), value.clone());
            }
        }
    }
    map
}

pub fn parse_message(raw: &Message) -> ParsedEmail {
    let headers = parse_headers(raw.payload.as_ref());
    let label_ids = raw.label_ids.clone().unwrap_or_default();

    let (body_text, body_html) = raw
        .payload
        .as_ref()
        .map(extract_body)
        .unwrap_or_default();
    let body_text = if body_text.is_empty() && !body_html.is_empty() {
        html2text::from_read(body_html.as_bytes(), 80)
    } else {
        body_text
    };

    let date = headers.get("Date").and_then(|d| parse_date(d));
    let attachments = raw
        .payload
        .as_ref()
        .map(extract_attachments)
        .unwrap_or_default();

    ParsedEmail {
        gmail_id: raw.id.clone().unwrap_or_default(),
        thread_id: raw.thread_id.clone().unwrap_or_default(),
        subject: headers.get("Subject").cloned().unwrap_or_default(),
        sender: headers.get("From").cloned().unwrap_or_default(),
        recipients_to: headers.get("To").cloned().unwrap_or_default(),
        recipients_cc: headers.get("Cc").cloned().unwrap_or_default(),
        recipients_bcc: headers.get("Bcc").cloned().unwrap_or_default(),
        date,
        snippet: raw.snippet.clone().unwrap_or_default(),
        body_text,
        body_html,
        list_unsubscribe: headers.get("List-Unsubscribe").cloned().unwrap_or_default(),
        size_estimate: raw.size_estimate.unwrap_or_default() as i64,
        is_read: !label_ids.iter().any(|l| l == "UNREAD"),
        is_starred: label_ids.iter().any(|l| l == "STARRED"),
        is_draft: label_ids.iter().any(|l| l == "DRAFT"),
        has_attachments: !attachments.is_empty(),
        history_id: raw
            .history_id
            .map(|h| h.to_string())
            .unwrap_or_default(),
        label_ids,
        attachments,
    }
}

/// Walk the MIME tree preferring the first text/plain part; remember the
/// first text/html part for the stripped-text fallback.
fn extract_body(payload: &MessagePart) -> (String, String) {
    let mut text_body = String::new();
    let mut html_body = String::new();

    if let Some(parts) = &payload.parts {
        for part in parts {
            let mime = part.mime_type.as_deref().unwrap_or_default();
            if mime == "text/plain" {
                text_body = decode_body(part.body.as_ref());
            } else if mime == "text/html" {
                html_body = decode_body(part.body.as_ref());
            } else if mime.starts_with("multipart/") {
                let (t, h) = extract_body(part);
                if text_body.is_empty() {
                    text_body = t;
                }
                if html_body.is_empty() {
                    html_body = h;
                }
            }
        }
    } else {
        let mime = payload.mime_type.as_deref().unwrap_or_default();
        let decoded = decode_body(payload.body.as_ref());
        if mime == "text/plain" {
            text_body = decoded;
        } else if mime == "text/html" {
            html_body = decoded;
        }
    }

    (text_body, html_body)
}

fn decode_body(body: Option<&MessagePartBody>) -> String {
    // the API client already decodes the base64url `data` field
    body.and_then(|b| b.data.as_ref())
        .map(|data| String::from_utf8_lossy(data).into_owned())
        .unwrap_or_default()
}

pub fn extract_attachments(payload: &MessagePart) -> Vec<EmailAttachment> {
    let mut attachments = Vec::new();
    if let Some(parts) = &payload.parts {
        for part in parts {
            if let Some(filename) = part.filename.as_deref().filter(|f| !f.is_empty()) {
                attachments.push(EmailAttachment {
                    attachment_id: part
                        .body
                        .as_ref()
                        .and_then(|b| b.attachment_id.clone())
                        .unwrap_or_default(),
                    filename: filename.to_string(),
                    mime_type: part.mime_type.clone().unwrap_or_default(),
                    size: part
                        .body
                        .as_ref()
                        .and_then(|b| b.size)
                        .unwrap_or_default() as i64,
                });
            }
            if part.parts.is_some() {
                attachments.extend(extract_attachments(part));
            }
        }
    }
    attachments
}

/// Lenient `Date:` header parse. RFC 2822 first (with any trailing comment
/// like `(UTC)` stripped), then the common non-conforming shapes.
pub fn parse_date(raw: &str) -> Option<DateTime<FixedOffset>> {
    let trimmed = match raw.find('(') {
        Some(idx) => raw[..idx].trim(),
        None => raw.trim(),
    };
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt);
    }
    for fmt in ["%d %b %Y %H:%M:%S %z", "%a, %d %b %Y %H:%M %z"] {
        if let Ok(dt) = DateTime::parse_from_str(trimmed, fmt) {
            return Some(dt);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use google_gmail1::api::MessagePartHeader;

    fn header(name: &str, value: &str) -> MessagePartHeader {
        MessagePartHeader {
            name: Some(name.to_string()),
            value: Some(value.to_string()),
        }
    }

    fn canonical_message() -> Message {
        Message {
            id: Some("msg_123".to_string()),
            thread_id: Some("thread_456".to_string()),
            label_ids: Some(vec!["INBOX".to_string(), "UNREAD".to_string()]),
            snippet: Some("This is a test".to_string()),
            history_id: Some(12345),
            size_estimate: Some(2048),
            payload: Some(MessagePart {
                mime_type: Some("text/plain".to_string()),
                headers: Some(vec![
                    header("From", "sender@example.com"),
                    header("To", "recipient@example.com"),
                    header("Subject", "Test Subject"),
                    header("Date", "Tue, 14 Nov 2023 12:00:00 +0000"),
                ]),
                body: Some(MessagePartBody {
                    data: Some(b"This is a test email body".to_vec()),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_canonical_message() {
        let parsed = parse_message(&canonical_message());
        assert_eq!(parsed.gmail_id, "msg_123");
        assert_eq!(parsed.thread_id, "thread_456");
        assert_eq!(parsed.subject, "Test Subject");
        assert_eq!(parsed.sender, "sender@example.com");
        assert_eq!(parsed.recipients_to, "recipient@example.com");
        assert!(!parsed.is_read);
        assert!(!parsed.is_starred);
        assert_eq!(parsed.body_text, "This is a test email body");
        assert_eq!(parsed.history_id, "12345");
        let date = parsed.date.unwrap();
        assert_eq!(date.to_rfc3339(), "2023-11-14T12:00:00+00:00");
    }

    #[test]
    fn test_prefers_plain_text_over_html() {
        let mut msg = canonical_message();
        msg.payload = Some(MessagePart {
            mime_type: Some("multipart/alternative".to_string()),
            headers: Some(vec![header("Subject", "multi")]),
            parts: Some(vec![
                MessagePart {
                    mime_type: Some("text/html".to_string()),
                    body: Some(MessagePartBody {
                        data: Some(b"<p>html body</p>".to_vec()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
                MessagePart {
                    mime_type: Some("text/plain".to_string()),
                    body: Some(MessagePartBody {
                        data: Some(b"plain body".to_vec()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        });
        let parsed = parse_message(&msg);
        assert_eq!(parsed.body_text, "plain body");
        assert_eq!(parsed.body_html, "<p>html body</p>");
    }

    #[test]
    fn test_html_fallback_is_stripped() {
        let mut msg = canonical_message();
        msg.payload = Some(MessagePart {
            mime_type: Some("text/html".to_string()),
            headers: Some(vec![header("Subject", "html only")]),
            body: Some(MessagePartBody {
                data: Some(b"<html><body><p>Hello <b>there</b></p></body></html>".to_vec()),
                ..Default::default()
            }),
            ..Default::default()
        });
        let parsed = parse_message(&msg);
        assert!(parsed.body_text.contains("Hello"));
        assert!(parsed.body_text.contains("there"));
        assert!(!parsed.body_text.contains('<'));
    }

    #[test]
    fn test_nested_attachments_are_collected() {
        let mut msg = canonical_message();
        msg.payload = Some(MessagePart {
            mime_type: Some("multipart/mixed".to_string()),
            headers: Some(vec![header("Subject", "attached")]),
            parts: Some(vec![
                MessagePart {
                    mime_type: Some("multipart/alternative".to_string()),
                    parts: Some(vec![MessagePart {
                        mime_type: Some("application/pdf".to_string()),
                        filename: Some("invoice.pdf".to_string()),
                        body: Some(MessagePartBody {
                            attachment_id: Some("att_1".to_string()),
                            size: Some(4096),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                },
                MessagePart {
                    mime_type: Some("image/png".to_string()),
                    filename: Some("photo.png".to_string()),
                    body: Some(MessagePartBody {
                        attachment_id: Some("att_2".to_string()),
                        size: Some(100),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            ]),
            ..Default::default()
        });
        let parsed = parse_message(&msg);
        assert!(parsed.has_attachments);
        let names: Vec<_> = parsed
            .attachments
            .iter()
            .map(|a| a.filename.as_str())
            .collect();
        assert_eq!(names, vec!["invoice.pdf", "photo.png"]);
    }

    #[test]
    fn test_unparseable_date_is_none() {
        assert!(parse_date("not a date").is_none());
        assert!(parse_date("Tue, 14 Nov 2023 12:00:00 +0000 (UTC)").is_some());
    }
}
