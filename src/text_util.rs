/// At most `max_chars` characters of `text`, cut on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Whitespace-collapsed opening of `text`, with `...` appended when cut.
pub fn preview(text: &str, max_chars: usize) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let cut = truncate_chars(&collapsed, max_chars);
    if cut.len() < collapsed.len() {
        format!("{}...", cut.trim_end())
    } else {
        collapsed
    }
}
