//! Canned replies for small talk, answered without touching the index.

pub const GREETING_REPLY: &str =
    "Xin chào! Tôi có thể giúp gì cho bạn về nội dung tài liệu?";
pub const FAREWELL_REPLY: &str = "Tạm biệt! Hẹn gặp lại bạn.";
pub const THANKS_REPLY: &str = "Không có gì! Bạn cứ hỏi thêm nếu cần.";
pub const ACKNOWLEDGMENT_REPLY: &str = "Vâng. Bạn còn câu hỏi nào khác không?";

/// Acknowledgments only count when the whole message is shorter than this
const MAX_ACKNOWLEDGMENT_CHARS: usize = 10;

const GREETINGS: &[&str] = &[
    "xin chào",
    "chào",
    "chào bạn",
    "chào buổi sáng",
    "chào buổi tối",
    "hello",
    "hi",
    "hey",
    "good morning",
    "good evening",
];

const FAREWELLS: &[&str] = &[
    "tạm biệt",
    "bye",
    "goodbye",
    "hẹn gặp lại",
    "see you",
    "see you later",
];

const THANKS: &[&str] = &[
    "cảm ơn",
    "cám ơn",
    "cảm ơn bạn",
    "cảm ơn nhiều",
    "cảm ơn bạn nhiều",
    "thanks",
    "thank you",
    "thank you very much",
    "thanks a lot",
];

const ACKNOWLEDGMENTS: &[&str] = &[
    "ok", "okay", "oke", "vâng", "dạ", "ừ", "ừm", "được", "hiểu rồi", "rõ rồi", "tốt", "got it",
    "great", "nice", "cool",
];

/// Reply for a greeting, farewell, thanks or short acknowledgment.
///
/// `normalized` must already be lower-cased with whitespace collapsed.
#[inline]
pub fn canned_reply(normalized: &str) -> Option<&'static str> {
    let message = normalized.trim_end_matches(['.', ',', '?', '!', '-', ' ']);
    if message.is_empty() {
        return None;
    }

    if GREETINGS.contains(&message) {
        Some(GREETING_REPLY)
    } else if FAREWELLS.contains(&message) {
        Some(FAREWELL_REPLY)
    } else if THANKS.contains(&message) {
        Some(THANKS_REPLY)
    } else if message.chars().count() < MAX_ACKNOWLEDGMENT_CHARS
        && ACKNOWLEDGMENTS.contains(&message)
    {
        Some(ACKNOWLEDGMENT_REPLY)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_each_table() {
        assert_eq!(canned_reply("xin chào!"), Some(GREETING_REPLY));
        assert_eq!(canned_reply("hello"), Some(GREETING_REPLY));
        assert_eq!(canned_reply("tạm biệt."), Some(FAREWELL_REPLY));
        assert_eq!(canned_reply("thank you!!"), Some(THANKS_REPLY));
        assert_eq!(canned_reply("cảm ơn bạn"), Some(THANKS_REPLY));
        assert_eq!(canned_reply("ok"), Some(ACKNOWLEDGMENT_REPLY));
        assert_eq!(canned_reply("hiểu rồi."), Some(ACKNOWLEDGMENT_REPLY));
    }

    #[test]
    fn requires_exact_match() {
        assert_eq!(canned_reply("xin chào, phở là gì?"), None);
        assert_eq!(canned_reply("ok phở là gì"), None);
        assert_eq!(canned_reply("hi there"), None);
        assert_eq!(canned_reply(""), None);
        assert_eq!(canned_reply("?!"), None);
    }
}
