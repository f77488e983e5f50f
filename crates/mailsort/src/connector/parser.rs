//! Raw RFC 822 message → [`FetchedMessage`].

use chrono::{DateTime, TimeZone, Utc};
use mail_parser::{MessageParser, MimeHeaders};

use super::error::{ConnectorError, Result};
use crate::model::FetchedMessage;

/// Parses a raw message fetched over IMAP.
///
/// `fallback_received` is used when the message carries no parsable `Date`
/// header (IMAP INTERNALDATE is passed here).
pub fn parse_message(
    raw: &[u8],
    provider_id: &str,
    fallback_received: Option<DateTime<Utc>>,
    preview_chars: usize,
) -> Result<FetchedMessage> {
    let message = MessageParser::default()
        .parse(raw)
        .ok_or_else(|| ConnectorError::Parse(format!("message {} is not valid RFC 822", provider_id)))?;

    let sender = message
        .from()
        .and_then(|addr| addr.first())
        .map(format_address)
        .unwrap_or_default();

    let header_date = message
        .date()
        .and_then(|d| Utc.timestamp_opt(d.to_timestamp(), 0).single());
    let received_at = fallback_received
        .or(header_date)
        .unwrap_or_else(Utc::now);

    let body = message.body_text(0).unwrap_or_default();
    let attachment_names: Vec<String> = message
        .attachments()
        .filter_map(|part| part.attachment_name().map(str::to_string))
        .collect();
    let has_attachments = message.attachment_count() > 0;

    Ok(FetchedMessage {
        provider_id: provider_id.to_string(),
        subject: message.subject().unwrap_or_default().to_string(),
        sender,
        received_at,
        body_preview: preview(&body, preview_chars),
        attachment_names,
        has_attachments,
    })
}

/// First `max_chars` characters of `text`, whitespace collapsed.
pub(crate) fn preview(text: &str, max_chars: usize) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect()
}

fn format_address(addr: &mail_parser::Addr) -> String {
    match addr.name() {
        Some(name) => format!("{} <{}>", name, addr.address().unwrap_or_default()),
        None => addr.address().unwrap_or_default().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INVOICE: &[u8] = b"From: Billing <billing@shop.example>\r\n\
To: me@example.com\r\n\
Subject: Your invoice #42\r\n\
Date: Tue, 3 Feb 2026 10:00:00 +0000\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"XYZ\"\r\n\
\r\n\
--XYZ\r\n\
Content-Type: text/plain\r\n\
\r\n\
Please find   your invoice\r\nattached.\r\n\
--XYZ\r\n\
Content-Type: application/pdf\r\n\
Content-Disposition: attachment; filename=\"invoice-42.pdf\"\r\n\
Content-Transfer-Encoding: base64\r\n\
\r\n\
JVBERi0xLjQK\r\n\
--XYZ--\r\n";

    #[test]
    fn test_parse_invoice_with_attachment() {
        let msg = parse_message(INVOICE, "17", None, 500).unwrap();
        assert_eq!(msg.provider_id, "17");
        assert_eq!(msg.subject, "Your invoice #42");
        assert_eq!(msg.sender, "Billing <billing@shop.example>");
        assert_eq!(msg.body_preview, "Please find your invoice attached.");
        assert!(msg.has_attachments);
        assert_eq!(msg.attachment_names, vec!["invoice-42.pdf".to_string()]);
        assert_eq!(msg.received_at.to_rfc3339(), "2026-02-03T10:00:00+00:00");
    }

    #[test]
    fn test_internal_date_takes_precedence() {
        let internal = Utc.with_ymd_and_hms(2026, 2, 4, 8, 0, 0).unwrap();
        let msg = parse_message(INVOICE, "17", Some(internal), 500).unwrap();
        assert_eq!(msg.received_at, internal);
    }

    #[test]
    fn test_preview_truncates_by_chars() {
        assert_eq!(preview("héllo wörld", 5), "héllo");
        assert_eq!(preview("  a \n\t b  ", 10), "a b");
    }

    #[test]
    fn test_plain_message_without_attachments() {
        let raw = b"From: friend@example.com\r\nSubject: hi\r\n\r\nsee you soon\r\n";
        let msg = parse_message(raw, "1", None, 4).unwrap();
        assert_eq!(msg.sender, "friend@example.com");
        assert_eq!(msg.body_preview, "see ");
        assert!(!msg.has_attachments);
        assert!(msg.attachment_names.is_empty());
    }
}
