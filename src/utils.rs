//! Text scanning helpers shared by the graph builder, the await sequencer
//! and placeholder substitution

/// Validates an identifier (alphanumeric + underscore, not starting with digit)
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };

    if !first.is_ascii_alphabetic() && first != '_' {
        return false;
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

/// Byte ranges `[start, end)` of quoted string literals, quotes included.
/// Backtick templates are only included when `include_templates` is set.
pub fn string_literal_spans(text: &str, include_templates: bool) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut open: Option<(usize, char)> = None;
    let mut escape_next = false;

    for (i, ch) in text.char_indices() {
        match open {
            Some((start, quote)) => {
                if escape_next {
                    escape_next = false;
                } else if ch == '\\' {
                    escape_next = true;
                } else if ch == quote {
                    spans.push((start, i + ch.len_utf8()));
                    open = None;
                }
            }
            None => {
                if ch == '"' || ch == '\'' || (include_templates && ch == '`') {
                    open = Some((i, ch));
                }
            }
        }
    }

    // Unterminated literal runs to the end of the text
    if let Some((start, _)) = open {
        spans.push((start, text.len()));
    }
    spans
}

#[derive(Clone, Copy)]
enum ScanState {
    Code,
    Quoted { start: usize, quote: char },
    TemplateText { start: usize },
}

/// Byte ranges of text that is not code: quoted string literals and the
/// literal parts of backtick templates. The code inside a template's
/// `${...}` interpolations is left out of the ranges.
pub fn non_code_spans(text: &str) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    // Brace depth inside each open `${`
    let mut interpolations: Vec<usize> = Vec::new();
    let mut state = ScanState::Code;
    let mut escape_next = false;
    let mut chars = text.char_indices().peekable();

    while let Some((i, ch)) = chars.next() {
        match state {
            ScanState::Quoted { start, quote } => {
                if escape_next {
                    escape_next = false;
                } else if ch == '\\' {
                    escape_next = true;
                } else if ch == quote {
                    spans.push((start, i + 1));
                    state = ScanState::Code;
                }
            }
            ScanState::TemplateText { start } => {
                if escape_next {
                    escape_next = false;
                } else if ch == '\\' {
                    escape_next = true;
                } else if ch == '`' {
                    spans.push((start, i + 1));
                    state = ScanState::Code;
                } else if ch == '$' && chars.peek().map(|&(_, next)| next) == Some('{') {
                    chars.next();
                    spans.push((start, i + 2));
                    interpolations.push(0);
                    state = ScanState::Code;
                }
            }
            ScanState::Code => match ch {
                '"' | '\'' => state = ScanState::Quoted { start: i, quote: ch },
                '`' => state = ScanState::TemplateText { start: i },
                '{' => {
                    if let Some(depth) = interpolations.last_mut() {
                        *depth += 1;
                    }
                }
                '}' => match interpolations.last().copied() {
                    Some(0) => {
                        interpolations.pop();
                        state = ScanState::TemplateText { start: i };
                    }
                    Some(_) => {
                        if let Some(depth) = interpolations.last_mut() {
                            *depth -= 1;
                        }
                    }
                    None => {}
                },
                _ => {}
            },
        }
    }

    match state {
        ScanState::Quoted { start, .. } | ScanState::TemplateText { start } => spans.push((start, text.len())),
        ScanState::Code => {}
    }
    spans
}

pub fn in_spans(spans: &[(usize, usize)], position: usize) -> bool {
    spans.iter().any(|&(start, end)| position >= start && position < end)
}

/// Finds the `)` matching the `(` at byte offset `open`, skipping string
/// literals. Returns `None` for unbalanced text.
pub fn find_matching_paren(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escape_next = false;

    for (i, ch) in text[open..].char_indices() {
        if let Some(q) = quote {
            if escape_next {
                escape_next = false;
            } else if ch == '\\' {
                escape_next = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' | '`' => quote = Some(ch),
            '(' => depth += 1,
            ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(open + i);
                }
            }
            _ => {}
        }
    }
    None
}

/// True when the identifier starting at `position` is a member access
/// (`x.name`), i.e. the previous non-space character is a `.`.
pub fn is_member_access(text: &str, position: usize) -> bool {
    text[..position].trim_end().ends_with('.')
}

/// True when `text` ends with the standalone keyword `keyword`.
pub fn ends_with_keyword(text: &str, keyword: &str) -> bool {
    let trimmed = text.trim_end();
    match trimmed.strip_suffix(keyword) {
        Some(rest) => !rest.chars().next_back().map_or(false, is_identifier_char),
        None => false,
    }
}
