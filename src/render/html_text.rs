//! HTML → plain-text conversion for the text/plain alternative.
//!
//! Tag walker, no DOM. Link targets are kept next to their text, images are
//! dropped, block elements become line breaks, and lines are never wrapped.

/// Elements whose content is never rendered.
const SKIPPED: [&str; 4] = ["script", "style", "head", "title"];

/// Elements separated from their surroundings by a blank line.
const PARAGRAPHS: [&str; 12] = [
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "blockquote", "table", "ul", "ol", "pre",
];

/// Elements that start on a new line.
const LINES: [&str; 8] = [
    "div", "tr", "section", "article", "header", "footer", "hr", "center",
];

/// Convert an HTML body into readable plain text.
pub fn html_to_text(html: &str) -> String {
    let mut out = TextBuffer::default();
    let mut links: Vec<(String, usize)> = Vec::new();
    let mut skip_until: Option<String> = None;
    let mut rest = html;

    while let Some(open) = rest.find('<') {
        let (text, after) = rest.split_at(open);
        if skip_until.is_none() {
            out.push_text(text);
        }

        if !opens_markup(after) {
            if skip_until.is_none() {
                out.push_text("<");
            }
            rest = &after[1..];
            continue;
        }

        if let Some(comment) = after.strip_prefix("<!--") {
            rest = comment.find("-->").map_or("", |end| &comment[end + 3..]);
            continue;
        }

        let Some(close) = find_tag_end(after) else {
            if skip_until.is_none() {
                out.push_text(after);
            }
            rest = "";
            break;
        };
        let tag = Tag::parse(&after[1..close]);
        rest = &after[close + 1..];

        if let Some(name) = &skip_until {
            if tag.closing && tag.name == *name {
                skip_until = None;
            }
            continue;
        }

        match tag.name.as_str() {
            name if SKIPPED.contains(&name) && !tag.closing && !tag.self_closing => {
                skip_until = Some(tag.name.clone());
            }
            "br" => out.line_break(),
            "img" => {}
            "li" if !tag.closing => {
                out.ensure_newlines(1);
                out.push_raw("* ");
            }
            "a" if !tag.closing => {
                let href = tag.attr("href").map(decode_entities).unwrap_or_default();
                links.push((href, out.len()));
            }
            "a" => {
                if let Some((href, start)) = links.pop() {
                    out.close_link(&href, start);
                }
            }
            name if PARAGRAPHS.contains(&name) => out.ensure_newlines(2),
            name if LINES.contains(&name) => out.ensure_newlines(1),
            _ => {}
        }
    }

    if skip_until.is_none() {
        out.push_text(rest);
    }
    out.finish()
}

/// Whether the `<` at `s[0]` starts a tag, comment or declaration rather than literal text.
fn opens_markup(s: &str) -> bool {
    matches!(s[1..].chars().next(), Some(c) if c == '/' || c == '!' || c == '?' || c.is_ascii_alphabetic())
}

/// Byte index of the `>` that ends the tag starting at `s[0]`, honouring quotes.
fn find_tag_end(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, ch) in s.char_indices().skip(1) {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '>') => return Some(i),
            (None, _) => {}
        }
    }
    None
}

#[derive(Debug)]
struct Tag {
    name: String,
    closing: bool,
    self_closing: bool,
    attrs: Vec<(String, String)>,
}

impl Tag {
    fn parse(inner: &str) -> Self {
        let inner = inner.trim();
        let (closing, body) = match inner.strip_prefix('/') {
            Some(body) => (true, body),
            None => (false, inner),
        };
        let self_closing = body.ends_with('/');
        let body = body.trim_end_matches('/');

        let name_end = body
            .find(|c: char| c.is_whitespace())
            .unwrap_or(body.len());
        let name = body[..name_end].to_ascii_lowercase();
        let attrs = parse_attrs(&body[name_end..]);

        Self {
            name,
            closing,
            self_closing,
            attrs,
        }
    }

    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

fn parse_attrs(mut s: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    loop {
        s = s.trim_start();
        if s.is_empty() {
            return attrs;
        }
        let key_end = s
            .find(|c: char| c == '=' || c.is_whitespace())
            .unwrap_or(s.len());
        let key = s[..key_end].to_ascii_lowercase();
        s = s[key_end..].trim_start();

        let Some(after_eq) = s.strip_prefix('=') else {
            if !key.is_empty() {
                attrs.push((key, String::new()));
            }
            continue;
        };
        let after_eq = after_eq.trim_start();

        let (value, remainder) = match after_eq.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let body = &after_eq[1..];
                match body.find(q) {
                    Some(end) => (&body[..end], &body[end + 1..]),
                    None => (body, ""),
                }
            }
            _ => {
                let end = after_eq
                    .find(char::is_whitespace)
                    .unwrap_or(after_eq.len());
                (&after_eq[..end], &after_eq[end..])
            }
        };
        attrs.push((key, value.to_string()));
        s = remainder;
    }
}

/// Decode the handful of entities that show up in mail templates.
fn decode_entities(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let decoded = tail.find(';').filter(|&end| end <= 10).and_then(|end| {
            let entity = &tail[1..end];
            decode_entity(entity).map(|ch| (ch, end + 1))
        });
        match decoded {
            Some((ch, consumed)) => {
                out.push(ch);
                rest = &tail[consumed..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        "copy" => Some('©'),
        "ndash" => Some('–'),
        "mdash" => Some('—'),
        _ => {
            let code = entity.strip_prefix('#')?;
            let value = match code.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => code.parse().ok()?,
            };
            char::from_u32(value)
        }
    }
}

/// Output accumulator that collapses HTML whitespace.
#[derive(Default)]
struct TextBuffer {
    buf: String,
    pending_space: bool,
}

impl TextBuffer {
    fn len(&self) -> usize {
        self.buf.len()
    }

    fn push_text(&mut self, raw: &str) {
        if raw.is_empty() {
            return;
        }
        for ch in decode_entities(raw).chars() {
            if ch.is_whitespace() {
                self.pending_space = true;
                continue;
            }
            self.flush_space();
            self.buf.push(ch);
        }
    }

    fn push_raw(&mut self, s: &str) {
        self.flush_space();
        self.buf.push_str(s);
    }

    fn flush_space(&mut self) {
        if self.pending_space && !self.buf.is_empty() && !self.buf.ends_with(['\n', ' ']) {
            self.buf.push(' ');
        }
        self.pending_space = false;
    }

    fn trim_trailing_spaces(&mut self) {
        let trimmed = self.buf.trim_end_matches(' ').len();
        self.buf.truncate(trimmed);
    }

    fn line_break(&mut self) {
        self.trim_trailing_spaces();
        self.buf.push('\n');
        self.pending_space = false;
    }

    fn ensure_newlines(&mut self, count: usize) {
        self.pending_space = false;
        if self.buf.is_empty() {
            return;
        }
        self.trim_trailing_spaces();
        let existing = self.buf.len() - self.buf.trim_end_matches('\n').len();
        for _ in existing..count {
            self.buf.push('\n');
        }
    }

    fn close_link(&mut self, href: &str, start: usize) {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            return;
        }
        let text = self.buf.get(start..).unwrap_or("").trim();
        let bare = href.strip_prefix("mailto:").unwrap_or(href);
        if text.is_empty() {
            self.push_raw(href);
        } else if text != href && text != bare {
            self.pending_space = false;
            self.buf.push_str(&format!(" ({href})"));
        }
    }

    fn finish(self) -> String {
        let mut text = String::with_capacity(self.buf.len());
        let mut blank_run = 0;
        for line in self.buf.lines() {
            let line = line.trim_end();
            if line.is_empty() {
                blank_run += 1;
                if blank_run > 1 {
                    continue;
                }
            } else {
                blank_run = 0;
            }
            text.push_str(line);
            text.push('\n');
        }
        text.trim().to_string()
    }
}
