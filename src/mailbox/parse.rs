//! RFC 822 parsing into `EmailRecord` via mail-parser.

use mail_parser::{Address, MessageParser, MimeHeaders};

use crate::mailbox::{EmailRecord, FetchedEmail, content_hash};

/// Parse a raw message and attach its content hash.
///
/// Returns `None` when mail-parser cannot make sense of the bytes.
pub fn parse_fetched(raw: &[u8]) -> Option<FetchedEmail> {
    let parsed = MessageParser::default().parse(raw)?;

    let email = EmailRecord {
        subject: parsed.subject().unwrap_or_default().trim().to_string(),
        from: first_address(parsed.from()).unwrap_or_default(),
        to: first_address(parsed.to()).unwrap_or_default(),
        body: extract_text(&parsed),
    };

    Some(FetchedEmail {
        email,
        hash: content_hash(raw),
    })
}

/// First mailbox address of a header, flattening groups.
fn first_address(addr: Option<&Address>) -> Option<String> {
    extract_addresses(addr).into_iter().next()
}

/// Extract email addresses from an optional mail_parser Address field.
///
/// Returns an empty vec if the address is None.
pub fn extract_addresses(addr: Option<&Address>) -> Vec<String> {
    let Some(addr) = addr else {
        return Vec::new();
    };
    match addr {
        Address::List(addrs) => addrs
            .iter()
            .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            .collect(),
        Address::Group(groups) => groups
            .iter()
            .flat_map(|g| {
                g.addresses
                    .iter()
                    .filter_map(|a| a.address.as_ref().map(|s| s.to_string()))
            })
            .collect(),
    }
}

/// Extract readable text from a parsed email.
fn extract_text(parsed: &mail_parser::Message) -> String {
    if let Some(text) = parsed.body_text(0) {
        return text.trim().to_string();
    }
    if let Some(html) = parsed.body_html(0) {
        return strip_html(html.as_ref());
    }
    for part in parsed.attachments() {
        let part: &mail_parser::MessagePart = part;
        if let Some(ct) = MimeHeaders::content_type(part)
            && ct.ctype() == "text"
            && let Ok(text) = std::str::from_utf8(part.contents())
        {
            return text.trim().to_string();
        }
    }
    String::new()
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
