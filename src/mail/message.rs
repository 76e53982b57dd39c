use mailparse::{MailHeaderMap, ParsedMail};

use crate::domain::email::{Flags, MessageData};
use crate::mail::decoders::{decode_header_words, preview_of};

const PREVIEW_CHARS: usize = 140;

/// Builds [`MessageData`] from raw RFC 822 bytes.
///
/// `raw` may hold only the header block when the message was fetched
/// partially; the body is then empty.
pub fn parse_message(server_id: &str, raw: &[u8], flags: Flags, size: u64) -> MessageData {
    let (subject, sender, date_epoch, body) = match mailparse::parse_mail(raw) {
        Ok(parsed) => {
            let subject = parsed
                .headers
                .get_first_value("Subject")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "(no subject)".to_string());
            let sender = parsed
                .headers
                .get_first_header("From")
                .map(|h| decode_header_words(h.get_value_raw()))
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "(unknown)".to_string());
            let date_epoch = parsed
                .headers
                .get_first_value("Date")
                .and_then(|d| mailparse::dateparse(&d).ok())
                .unwrap_or(0);
            let body = text_body(&parsed).unwrap_or_default();
            (subject, sender, date_epoch, body)
        }
        Err(_) => (
            "(no subject)".to_string(),
            "(unknown)".to_string(),
            0,
            String::from_utf8_lossy(raw).into_owned(),
        ),
    };

    MessageData {
        server_id: server_id.to_string(),
        preview: preview_of(&body, PREVIEW_CHARS),
        subject,
        sender,
        date_epoch,
        size,
        flags,
        body,
    }
}

/// First text/plain part, else the first text/html part with tags removed.
fn text_body(part: &ParsedMail) -> Option<String> {
    find_part(part, "text/plain")
        .or_else(|| find_part(part, "text/html").map(|html| strip_tags(&html)))
}

fn find_part(part: &ParsedMail, mimetype: &str) -> Option<String> {
    if part.subparts.is_empty() {
        if part.ctype.mimetype.eq_ignore_ascii_case(mimetype) {
            return part.get_body().ok();
        }
        return None;
    }
    part.subparts.iter().find_map(|sp| find_part(sp, mimetype))
}

fn strip_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(ch),
            _ => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::email::Flag;

    const PLAIN: &[u8] = b"From: =?UTF-8?Q?J=C3=BCrgen?= <j@example.org>\r\n\
Subject: Lunch\r\n\
Date: Tue, 1 Jul 2003 10:52:37 +0200\r\n\
\r\n\
Are we still on\r\nfor noon?\r\n";

    const ALTERNATIVE: &[u8] = b"From: a@example.org\r\n\
Subject: Report\r\n\
Content-Type: multipart/alternative; boundary=\"b\"\r\n\
\r\n\
--b\r\n\
Content-Type: text/html\r\n\
\r\n\
<p>html version</p>\r\n\
--b\r\n\
Content-Type: text/plain\r\n\
\r\n\
plain version\r\n\
--b--\r\n";

    #[test]
    fn parses_headers_and_body() {
        let flags = Flags::from([Flag::Seen]);
        let data = parse_message("42", PLAIN, flags.clone(), 120);

        assert_eq!(data.server_id, "42");
        assert_eq!(data.subject, "Lunch");
        assert_eq!(data.sender, "Jürgen <j@example.org>");
        assert_eq!(data.date_epoch, 1057049557);
        assert_eq!(data.preview, "Are we still on for noon?");
        assert_eq!(data.flags, flags);
        assert_eq!(data.size, 120);
    }

    #[test]
    fn prefers_plain_text_part() {
        let data = parse_message("1", ALTERNATIVE, Flags::new(), 0);
        assert_eq!(data.preview, "plain version");
    }

    #[test]
    fn header_only_message_has_empty_body() {
        let data = parse_message("1", b"Subject: partial\r\n\r\n", Flags::new(), 999_999);
        assert_eq!(data.subject, "partial");
        assert_eq!(data.body, "");
        assert_eq!(data.sender, "(unknown)");
    }

    #[test]
    fn html_is_stripped() {
        assert_eq!(strip_tags("<p>hi</p>there").trim(), "hi there");
    }
}
