//! Module `counter` implement the `M/Counter` metadata format.
//!
//! The counter value is a `;`-separated list of `mimetype=count`
//! records. Mimetypes may themselves contain `;` and `=` (like
//! `text/html;raw=true`), so records cannot be split naively: a token
//! without `=` opens a multi-token mimetype that keeps absorbing
//! tokens until one ends in `=digits` and carries a `param=value` of
//! its own. A malformed record aborts parsing, keeping what was
//! already parsed.

use std::collections::BTreeMap;

/// Mimetype to entry-count mapping parsed out of `M/Counter`.
pub type MimeCounter = BTreeMap<String, u64>;

fn parse_count(s: &str) -> Option<u64> {
    match !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
        true => s.parse().ok(),
        false => None,
    }
}

/// Parse a counter string into a mimetype map.
pub fn parse_mimetype_counter(value: &str) -> MimeCounter {
    let mut out = MimeCounter::new();
    let mut tokens = value.split(';');

    'outer: while let Some(token) = tokens.next() {
        if token.is_empty() {
            continue;
        }
        match token.rfind('=') {
            Some(k) => {
                let (mime, count) = (&token[..k], &token[k + 1..]);
                match parse_count(count) {
                    Some(n) if !mime.is_empty() => {
                        out.insert(mime.to_string(), n);
                    }
                    _ => break 'outer,
                }
            }
            None => {
                // the mimetype contains ';', absorb following tokens.
                let mut mime = token.to_string();
                loop {
                    let next = match tokens.next() {
                        Some(next) => next,
                        None => break 'outer,
                    };
                    match next.rfind('=') {
                        Some(k) if parse_count(&next[k + 1..]).is_some()
                            && next[..k].contains('=') =>
                        {
                            mime.push(';');
                            mime.push_str(&next[..k]);
                            out.insert(mime, parse_count(&next[k + 1..]).unwrap());
                            break;
                        }
                        _ => {
                            mime.push(';');
                            mime.push_str(next);
                        }
                    }
                }
            }
        }
    }

    out
}

/// Sum the counts of mimetypes selected by `pred`.
pub fn count_mimetype<F>(counter: &MimeCounter, pred: F) -> u64
where
    F: Fn(&str) -> bool,
{
    counter
        .iter()
        .filter(|(mime, _)| pred(mime))
        .map(|(_, count)| count)
        .sum()
}

#[cfg(test)]
#[path = "counter_test.rs"]
mod counter_test;
