//! Fixed extractors that pull mutation parameters out of a task's
//! free-text instruction: heading levels, style names, hyperlink targets,
//! TOC level bounds, template names, and quoted replacement payloads.

/// Localized number words accepted where a digit is expected.
const NUMBER_WORDS: &[(char, u8)] = &[
    ('一', 1),
    ('二', 2),
    ('三', 3),
    ('四', 4),
    ('五', 5),
    ('六', 6),
    ('七', 7),
    ('八', 8),
    ('九', 9),
];

fn digits_in(text: &str) -> Vec<u8> {
    let mut digits = Vec::new();
    for ch in text.chars() {
        if let Some(d) = ch.to_digit(10) {
            if (1..=9).contains(&d) {
                digits.push(d as u8);
            }
        }
    }
    digits
}

/// First digit 1-9, then localized number words, then 1.
pub fn heading_level(instruction: &str) -> u8 {
    if let Some(&level) = digits_in(instruction).first() {
        return level;
    }
    for ch in instruction.chars() {
        if let Some(&(_, level)) = NUMBER_WORDS.iter().find(|(w, _)| *w == ch) {
            return level;
        }
    }
    1
}

/// Canonical style name for a style instruction. Recognizes heading levels
/// (localized or English), body text, and title; defaults to Normal.
pub fn style_name(instruction: &str) -> String {
    let lower = instruction.to_lowercase();
    if lower.contains("heading") || instruction.contains("标题") {
        return format!("Heading {}", heading_level(instruction));
    }
    if lower.contains("title") {
        return "Title".to_string();
    }
    if lower.contains("normal") || lower.contains("body") || instruction.contains("正文") {
        return "Normal".to_string();
    }
    "Normal".to_string()
}

/// Hyperlink target from an instruction: first URL token, else a mailto for
/// the first email-shaped token, else the trimmed instruction as an internal
/// anchor.
pub fn hyperlink_address(instruction: &str) -> String {
    for token in instruction.split_whitespace() {
        let token = token.trim_matches(|c: char| {
            matches!(c, ',' | ';' | '。' | '，' | ')' | '(' | '"' | '\'')
        });
        let lower = token.to_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return token.to_string();
        }
    }
    for token in instruction.split_whitespace() {
        let token = token.trim_matches(|c: char| {
            matches!(c, ',' | ';' | '。' | '，' | ')' | '(' | '"' | '\'')
        });
        if is_email(token) {
            return format!("mailto:{token}");
        }
    }
    instruction.trim().to_string()
}

fn is_email(token: &str) -> bool {
    let Some((local, domain)) = token.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && token.chars().all(|c| !c.is_whitespace())
}

/// TOC level bounds: two digits -> (upper, lower); one digit -> (1, digit);
/// none -> (1, 3). Always clamped with lower >= upper.
pub fn toc_levels(instruction: &str) -> (u8, u8) {
    let digits = digits_in(instruction);
    match digits.as_slice() {
        [] => (1, 3),
        [only] => (1, (*only).clamp(1, 9)),
        [first, second, ..] => {
            let upper = (*first).clamp(1, 9);
            let lower = (*second).clamp(upper, 9);
            (upper, lower)
        }
    }
}

/// Template name: the token after a "template" keyword, else the token
/// before it, else "default".
pub fn template_name(instruction: &str) -> String {
    let tokens: Vec<&str> = instruction.split_whitespace().collect();
    let clean = |t: &str| {
        t.trim_matches(|c: char| matches!(c, ':' | '：' | ',' | '.' | '"' | '\'' | '。'))
            .to_string()
    };
    for (i, token) in tokens.iter().enumerate() {
        let lower = token.to_lowercase();
        if lower.starts_with("template") || token.contains("模板") {
            if let Some(next) = tokens.get(i + 1) {
                let name = clean(next);
                if !name.is_empty() && !name.eq_ignore_ascii_case("to") {
                    return name;
                }
            }
            if i > 0 {
                let name = clean(tokens[i - 1]);
                if !name.is_empty()
                    && !name.eq_ignore_ascii_case("the")
                    && !name.eq_ignore_ascii_case("apply")
                    && !name.eq_ignore_ascii_case("a")
                {
                    return name;
                }
            }
        }
    }
    "default".to_string()
}

/// Replacement payload for rewrite/insert tasks: the last quoted span in the
/// instruction, straight or curly quotes. Falls back to the instruction
/// itself.
pub fn payload_text(instruction: &str) -> String {
    let chars: Vec<char> = instruction.chars().collect();
    let pairs: &[(char, char)] = &[('\'', '\''), ('"', '"'), ('\u{2018}', '\u{2019}'), ('\u{201C}', '\u{201D}')];

    let mut best: Option<(usize, String)> = None;
    for &(open, close) in pairs {
        let mut i = 0;
        while i < chars.len() {
            if chars[i] == open {
                if let Some(j) = (i + 1..chars.len()).find(|&j| chars[j] == close) {
                    let inner: String = chars[i + 1..j].iter().collect();
                    if !inner.is_empty() {
                        match &best {
                            Some((start, _)) if *start >= i => {}
                            _ => best = Some((i, inner)),
                        }
                    }
                    i = j + 1;
                    continue;
                }
            }
            i += 1;
        }
    }
    best.map(|(_, text)| text)
        .unwrap_or_else(|| instruction.trim().to_string())
}
