//! Token Chunker
//!
//! Splits text into the minimal units the fallback synthesizer emits: runs of
//! word characters and single punctuation marks. Whitespace is never a unit on
//! its own; it rides along with the unit before it (or, at the very start of
//! the text, with the first unit). Concatenating the units always yields the
//! input unchanged.

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

/// Split `text` into emission units
///
/// ```
/// use answerflow_core::tokenizer::token_chunks;
///
/// assert_eq!(token_chunks("Привет мир!"), vec!["Привет ", "мир", "!"]);
/// ```
#[must_use]
pub fn token_chunks(text: &str) -> Vec<String> {
    let mut units = Vec::new();
    let mut current = String::new();
    // The unit has a non-whitespace body
    let mut body_started = false;
    // Trailing whitespace has been absorbed; the next body starts a new unit
    let mut body_done = false;
    let mut in_word = false;

    for ch in text.chars() {
        if ch.is_whitespace() {
            current.push(ch);
            if body_started {
                body_done = true;
            }
            in_word = false;
            continue;
        }

        let word = is_word_char(ch);
        let starts_new = body_done || (body_started && !(word && in_word));
        if starts_new {
            units.push(std::mem::take(&mut current));
            body_done = false;
        }

        current.push(ch);
        body_started = true;
        in_word = word;
    }

    if !current.is_empty() {
        units.push(current);
    }
    units
}
