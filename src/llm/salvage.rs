//! Opportunistic JSON repair, applied only after a parse failure: strip
//! fenced code markers, trim prose outside the outermost object, normalize
//! smart quotes, and drop trailing commas.

pub fn salvage(raw: &str) -> String {
    let stripped = strip_code_fences(raw);
    let trimmed = trim_to_braces(&stripped);
    let normalized = normalize_smart_quotes(&trimmed);
    strip_trailing_commas(&normalized)
}

/// Remove Markdown code-fence lines (```json ... ```).
fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Keep only the span from the first `{` to its matching `}`, dropping any
/// prose before or after. Falls back to the last `}` when the braces never
/// balance.
fn trim_to_braces(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let Some(open) = chars.iter().position(|&c| c == '{') else {
        return text.to_string();
    };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, &c) in chars.iter().enumerate().skip(open) {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return chars[open..=i].iter().collect();
                }
            }
            _ => {}
        }
    }

    match chars.iter().rposition(|&c| c == '}') {
        Some(close) if close > open => chars[open..=close].iter().collect(),
        _ => chars[open..].iter().collect(),
    }
}

/// Curly quotes are the most common way models break their own JSON.
fn normalize_smart_quotes(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            '\u{201C}' | '\u{201D}' | '\u{201E}' => '"',
            '\u{2018}' | '\u{2019}' => '\'',
            other => other,
        })
        .collect()
}

/// Drop `,` immediately before a closing `}` or `]`, outside string
/// literals.
fn strip_trailing_commas(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            out.push(c);
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if matches!(next, Some('}') | Some(']')) {
                    continue;
                }
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}
