/// Appends a streamed fragment to the running transcript.
///
/// The fragment is trimmed; blank fragments leave the transcript alone. A
/// single space separates the two unless the transcript is empty or already
/// ends in whitespace. Returns `None` when nothing changed.
pub fn append_fragment(current: &str, fragment: &str) -> Option<String> {
    let clean = fragment.trim();
    if clean.is_empty() {
        return None;
    }

    let needs_space = !current.is_empty() && !current.ends_with(char::is_whitespace);
    let mut next = String::with_capacity(current.len() + clean.len() + 1);
    next.push_str(current);
    if needs_space {
        next.push(' ');
    }
    next.push_str(clean);
    Some(next)
}
