//! Text canonicalisation applied before any text leaves the gateway.
//!
//! Speech vendors are picky about punctuation: ASCII marks render as
//! awkward pauses, stray symbols get read aloud, and bracketed asides
//! break prosody. `normalize` rewrites input into the fullwidth
//! punctuation the vendors expect and drops everything they cannot speak.

/// Fullwidth marks treated as pauses. Duplicate runs collapse and
/// leading/trailing pauses are stripped.
const PAUSE_MARKS: [char; 7] = ['，', '。', '、', '！', '？', '；', '：'];

/// Newline runs become a single comma-style pause.
const NEWLINE_PAUSE: char = '，';

fn is_pause_mark(c: char) -> bool {
    PAUSE_MARKS.contains(&c)
}

/// Clean and canonicalise `text`. Pure, total, and idempotent:
/// `normalize(normalize(t)) == normalize(t)` for every input.
///
/// Returns the empty string only for whitespace-only input; if cleaning
/// removes everything, the original trimmed input is returned instead so
/// callers never lose a non-empty utterance.
pub fn normalize(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    // Runs of CR/LF become one pause mark.
    let mut collapsed = String::with_capacity(trimmed.len());
    let mut in_newline = false;
    for c in trimmed.chars() {
        if c == '\r' || c == '\n' {
            if !in_newline {
                collapsed.push(NEWLINE_PAUSE);
                in_newline = true;
            }
        } else {
            collapsed.push(c);
            in_newline = false;
        }
    }

    // ASCII ellipsis to the fullwidth form before '.' is remapped below.
    let collapsed = collapsed.replace("...", "……");

    // Bracket/quote punctuation separates words rather than joining them.
    let spaced: String = collapsed
        .chars()
        .map(|c| match c {
            '"' | '\'' | '[' | ']' | '{' | '}' | '(' | ')' | '<' | '>' => ' ',
            _ => c,
        })
        .collect();

    let mut out = String::with_capacity(spaced.len());
    let mut last_was_space = false;
    for c in spaced.chars() {
        if c.is_control() {
            continue;
        }
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
            continue;
        }
        let mapped = match c {
            ',' => '，',
            '.' => '。',
            '!' => '！',
            '?' => '？',
            ';' => '；',
            ':' => '：',
            other => other,
        };
        if mapped != c || is_pause_mark(mapped) || mapped == '…' || mapped.is_alphanumeric() {
            out.push(mapped);
            last_was_space = false;
        }
        // Remaining punctuation and symbols (math, currency, modifier,
        // dingbats) are dropped outright.
    }

    // Collapse repeated identical pause marks.
    let mut deduped = String::with_capacity(out.len());
    let mut prev: Option<char> = None;
    for c in out.chars() {
        if is_pause_mark(c) && prev == Some(c) {
            continue;
        }
        deduped.push(c);
        prev = Some(c);
    }

    while deduped.contains("  ") {
        deduped = deduped.replace("  ", " ");
    }

    let trim_set: &[char] = &[' ', '，', '。', '、', '！', '？', '；', '：'];
    let result = deduped.trim_matches(trim_set);

    if result.is_empty() {
        trimmed.to_string()
    } else {
        result.to_string()
    }
}
