//! Canned greeting shortcuts.
//!
//! Plain hellos are answered from a small table instead of spending a
//! backend exchange on them. Matching is exact on the trimmed, lowercased
//! message; anything longer than a bare greeting goes to the backend.

use rand::seq::SliceRandom;

const GREETING_KEYS: &[&str] = &[
    "hi", "hello", "hey", "yo", "hola", "bonjour", "ciao", "你好", "こんにちは",
];

const GREETING_REPLIES: &[&str] = &[
    "Hello! How can I help you today?",
    "Hi there! What can I do for you?",
    "Hey! What's on your mind?",
];

/// Canned reply for a bare greeting, or `None` for anything else.
pub fn reply_to(text: &str) -> Option<String> {
    let normalized = text.trim().trim_end_matches(['!', '.', '?']).to_lowercase();
    if !GREETING_KEYS.contains(&normalized.as_str()) {
        return None;
    }
    GREETING_REPLIES
        .choose(&mut rand::thread_rng())
        .map(|r| r.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_greetings_get_a_canned_reply() {
        assert!(reply_to("hi").is_some());
        assert!(reply_to("Hello!").is_some());
        assert!(reply_to("  hey  ").is_some());
        assert!(reply_to("你好").is_some());
    }

    #[test]
    fn real_questions_go_to_the_backend() {
        assert!(reply_to("hi, can you explain monads?").is_none());
        assert!(reply_to("hello world program in rust").is_none());
        assert!(reply_to("").is_none());
    }
}
