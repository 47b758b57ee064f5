use std::{borrow::Cow, sync::OnceLock};

use log::debug;
use regex::Regex;

/// Collapses every run of line breaks (and the whitespace around them) into a
/// single space and trims the ends
pub fn make_single_line(s: &str) -> Cow<'_, str> {
    static CELL: OnceLock<Regex> = OnceLock::new();
    let re = CELL.get_or_init(|| {
        debug!("Compiling regex for collapsing line breaks");
        Regex::new(r"[ \t]*[\r\n]+[ \t]*").expect("failed to compile regex")
    });
    let trimmed = s.trim();
    if trimmed.contains(['\r', '\n']) {
        Cow::Owned(re.replace_all(trimmed, " ").into_owned())
    } else {
        Cow::Borrowed(trimmed)
    }
}

pub fn html_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn no_linefeed() {
        let s = "Hello\nWorld!".to_string();
        assert!(s.contains('\n'));
        assert!(!make_single_line(&s).contains('\n'));
    }

    #[rstest]
    #[case("The system has rebooted\r\nwithout cleanly shutting down first.", "The system has rebooted without cleanly shutting down first.")]
    #[case("  line one \n\n\n  line two  ", "line one line two")]
    #[case("already single", "already single")]
    fn single_line(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(make_single_line(input), expected);
    }

    #[test]
    fn escapes_markup() {
        assert_eq!(
            html_escape(r#"<b>"Disk" & 'Volume'</b>"#),
            "&lt;b&gt;&quot;Disk&quot; &amp; &#39;Volume&#39;&lt;/b&gt;"
        );
    }
}
