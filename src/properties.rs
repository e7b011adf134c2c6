//! Minimal reader/writer for `.properties` style key=value text
//!
//! Reads what `java.util.Properties.store` and commons-configuration write
//! (comments, `=`/`:`/whitespace separators, backslash escapes, line
//! continuations). Lines that cannot be decoded are skipped rather than
//! failing the whole file.

/// Ordered key=value pairs; later duplicates replace earlier values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Properties {
    entries: Vec<(String, String)>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn parse(text: &str) -> Self {
        let mut props = Properties::new();
        for line in logical_lines(text) {
            if let Some((k, v)) = parse_line(&line) {
                props.set(k, v);
            }
        }
        props
    }

    pub fn to_text(&self) -> String {
        let mut out = String::from("# HomeCloud client metadata\n");
        for (k, v) in &self.entries {
            out.push_str(&escape(k, true));
            out.push('=');
            out.push_str(&escape(v, false));
            out.push('\n');
        }
        out
    }
}

fn ends_with_odd_backslashes(s: &str) -> bool {
    s.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

/// Join continuation lines and drop blanks and comments.
fn logical_lines(text: &str) -> Vec<String> {
    let mut lines = Vec::new();
    let mut pending: Option<String> = None;
    for raw in text.lines() {
        let trimmed = raw.trim_start();
        let mut current = match pending.take() {
            Some(mut acc) => {
                acc.push_str(trimmed);
                acc
            }
            None => {
                if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with('!') {
                    continue;
                }
                trimmed.to_string()
            }
        };
        if ends_with_odd_backslashes(&current) {
            current.pop();
            pending = Some(current);
        } else {
            lines.push(current);
        }
    }
    if let Some(last) = pending {
        lines.push(last);
    }
    lines
}

fn parse_line(line: &str) -> Option<(String, String)> {
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    let mut key_end = chars.len();
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '=' | ':' | ' ' | '\t' | '\x0c' => {
                key_end = i;
                break;
            }
            _ => i += 1,
        }
    }
    let key_end = key_end.min(chars.len());
    let mut j = key_end;
    while j < chars.len() && matches!(chars[j], ' ' | '\t' | '\x0c') {
        j += 1;
    }
    if j < chars.len() && matches!(chars[j], '=' | ':') {
        j += 1;
    }
    while j < chars.len() && matches!(chars[j], ' ' | '\t' | '\x0c') {
        j += 1;
    }
    let key: String = chars[..key_end].iter().collect();
    let value: String = chars[j..].iter().collect();
    let key = unescape(&key)?;
    if key.is_empty() {
        return None;
    }
    Some((key, unescape(&value)?))
}

fn unescape(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len());
    // `\uXXXX` escapes are UTF-16 units; surrogate pairs span two escapes
    let mut units: Vec<u16> = Vec::new();
    let mut it = s.chars();
    while let Some(c) = it.next() {
        if c == '\\' && it.clone().next() == Some('u') {
            it.next();
            let hex: String = it.by_ref().take(4).collect();
            if hex.len() != 4 {
                return None;
            }
            units.push(u16::from_str_radix(&hex, 16).ok()?);
            continue;
        }
        if !units.is_empty() {
            out.push_str(&String::from_utf16(&units).ok()?);
            units.clear();
        }
        if c != '\\' {
            out.push(c);
            continue;
        }
        match it.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\x0c'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    if !units.is_empty() {
        out.push_str(&String::from_utf16(&units).ok()?);
    }
    Some(out)
}

fn escape(s: &str, is_key: bool) -> String {
    let mut out = String::with_capacity(s.len());
    for (i, c) in s.chars().enumerate() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\x0c' => out.push_str("\\f"),
            ' ' if is_key || i == 0 => out.push_str("\\ "),
            '=' | ':' | '#' | '!' if is_key => {
                out.push('\\');
                out.push(c);
            }
            // Keep the file ASCII, as `Properties.store` does
            c if c < ' ' || c > '~' => {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push_str(&format!("\\u{:04X}", unit));
                }
            }
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_java_store_output() {
        let text = "#Sat Mar 04 10:00:00 CET 2017\nalice.lastSync=2017-03-04 09\\:59\\:12\n";
        let p = Properties::parse(text);
        assert_eq!(p.get("alice.lastSync"), Some("2017-03-04 09:59:12"));
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn parses_commons_configuration_output() {
        let p = Properties::parse("bob.lastSync = 2020-01-02 03:04:05\n");
        assert_eq!(p.get("bob.lastSync"), Some("2020-01-02 03:04:05"));
    }

    #[test]
    fn separators_and_comments() {
        let text = "! bang comment\n  # hash comment\n\na:1\nb 2\nc=\nd\n";
        let p = Properties::parse(text);
        assert_eq!(p.get("a"), Some("1"));
        assert_eq!(p.get("b"), Some("2"));
        assert_eq!(p.get("c"), Some(""));
        assert_eq!(p.get("d"), Some(""));
    }

    #[test]
    fn continuation_lines_are_joined() {
        let p = Properties::parse("k=first \\\n    second\n");
        assert_eq!(p.get("k"), Some("first second"));
    }

    #[test]
    fn bad_unicode_escape_skips_only_that_line() {
        let p = Properties::parse("bad=\\uZZ\ngood=yes\n");
        assert_eq!(p.get("bad"), None);
        assert_eq!(p.get("good"), Some("yes"));
    }

    #[test]
    fn garbage_is_tolerated() {
        let p = Properties::parse("\u{0}\u{1}=\n=novalue\n\\");
        assert_eq!(p.get("alice.lastSync"), None);
    }

    #[test]
    fn non_ascii_is_written_as_unicode_escapes() {
        let mut p = Properties::new();
        p.set("ünï.lastSync", "2024-05-06 07:08:09");
        p.set("emoji", "\u{1F600}");
        let text = p.to_text();
        assert!(text.is_ascii());
        assert!(text.contains("\\u00FCn\\u00EF.lastSync=2024-05-06 07:08:09\n"));
        assert!(text.contains("emoji=\\uD83D\\uDE00\n"));
        assert_eq!(Properties::parse(&text), p);
    }

    #[test]
    fn unpaired_surrogate_escape_skips_the_line() {
        let p = Properties::parse("bad=\\uD83D\nok=\\u0041\n");
        assert_eq!(p.get("bad"), None);
        assert_eq!(p.get("ok"), Some("A"));
    }

    #[test]
    fn writer_output_reads_back() {
        let mut p = Properties::new();
        p.set("odd key=:#!.lastSync", "2024-05-06 07:08:09");
        p.set("plain.lastSync", " leading space");
        p.set("plain.lastSync", "1970-01-01 00:00:00");
        let text = p.to_text();
        assert!(text.contains("plain.lastSync=1970-01-01 00:00:00\n"));
        assert_eq!(Properties::parse(&text), p);
    }
}
