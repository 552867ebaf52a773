/// Return the body of the first fenced block in `src` (language tag
/// dropped), or the trimmed input when there is no fence. An unclosed fence
/// yields everything after it.
pub fn strip_fences(src: &str) -> String {
    let src = src.trim_start_matches('\u{feff}');
    let Some(open) = src.find("```") else {
        return src.trim().to_string();
    };
    let after = &src[open + 3..];
    let body = match after.find('\n') {
        Some(nl) if is_lang_tag(&after[..nl]) => &after[nl + 1..],
        Some(_) => after,
        // fence and content on one line: ```{"a": 1}```
        None => after,
    };
    let body = match body.find("```") {
        Some(close) => &body[..close],
        None => body,
    };
    body.trim().to_string()
}

fn is_lang_tag(s: &str) -> bool {
    let s = s.trim();
    s.is_empty()
        || s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '_' | '.'))
}

/// Clean generated code: unwrap fences, drop trailing whitespace on every
/// line, collapse runs of more than two blank lines.
pub fn refine_code(src: &str) -> String {
    let body = strip_fences(src);
    let mut out: Vec<&str> = Vec::new();
    let mut blanks = 0usize;
    for line in body.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blanks += 1;
            if blanks > 2 {
                continue;
            }
        } else {
            blanks = 0;
        }
        out.push(line);
    }
    out.join("\n")
}
