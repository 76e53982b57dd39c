/// Decodes RFC 2047 encoded-words in a raw header value.
pub fn decode_header_words(raw: &[u8]) -> String {
    // mailparse only decodes complete "Key: value" lines
    let mut line = b"X: ".to_vec();
    line.extend_from_slice(raw);
    line.extend_from_slice(b"\r\n");

    match mailparse::parse_header(&line) {
        Ok((header, _)) => header.get_value(),
        Err(_) => String::from_utf8_lossy(raw).into_owned(),
    }
}

/// Collapses a body into a single line of at most `max_chars` characters.
pub fn preview_of(body: &str, max_chars: usize) -> String {
    let mut out = String::new();
    for line in body.lines().map(str::trim).filter(|l| !l.is_empty()) {
        // quoted replies don't make useful previews
        if line.starts_with('>') {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(line);
        if out.chars().count() >= max_chars {
            break;
        }
    }
    out.chars().take(max_chars).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_encoded_words() {
        assert_eq!(decode_header_words(b"=?UTF-8?Q?Gr=C3=BC=C3=9Fe?="), "Grüße");
        assert_eq!(decode_header_words(b"plain"), "plain");
    }

    #[test]
    fn preview_skips_blank_and_quoted_lines() {
        let body = "Hi Bob,\n\n> old stuff\n  see you   \n";
        assert_eq!(preview_of(body, 140), "Hi Bob, see you");
        assert_eq!(preview_of(body, 5), "Hi Bo");
    }
}
