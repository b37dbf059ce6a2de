use super::classifier::QuestionType;

/// Marker appended to answers cut at the length limit
pub const TRUNCATION_MARKER: &str = "...";

// Lower-cased phrases showing the model found nothing useful in the context
const NO_INFORMATION_PHRASES: &[&str] = &[
    "không có thông tin",
    "không tìm thấy thông tin",
    "không đề cập",
    "tài liệu không cung cấp",
    "tôi không biết",
    "no information",
    "not mentioned",
    "does not contain",
    "doesn't contain",
    "i don't know",
    "i do not know",
    "cannot find",
    "can't find",
];

const ANSWER_PREFIXES: &[&str] = &[
    "trả lời:",
    "câu trả lời:",
    "dựa trên tài liệu,",
    "dựa trên ngữ cảnh,",
    "theo tài liệu,",
    "answer:",
    "based on the context,",
    "based on the document,",
    "according to the context,",
];

const ANSWER_SUFFIXES: &[&str] = &[
    "hy vọng điều này hữu ích.",
    "hy vọng thông tin này hữu ích.",
    "i hope this helps.",
    "hope this helps.",
    "let me know if you have any other questions.",
];

fn instruction(question_type: QuestionType) -> &'static str {
    match question_type {
        QuestionType::Definition => {
            "Định nghĩa ngắn gọn khái niệm được hỏi trong một hoặc hai câu."
        }
        QuestionType::Comparison => {
            "So sánh các đối tượng được hỏi, nêu rõ điểm giống và điểm khác trong tối đa bốn câu."
        }
        QuestionType::Procedure => {
            "Trình bày các bước thực hiện theo thứ tự, mỗi bước một câu ngắn."
        }
        QuestionType::CauseEffect => {
            "Giải thích nguyên nhân và kết quả một cách trực tiếp trong tối đa ba câu."
        }
        QuestionType::Historical => {
            "Nêu mốc thời gian và sự kiện liên quan trong tối đa ba câu."
        }
        QuestionType::Listing => "Liệt kê các mục được hỏi, ngăn cách bằng dấu phẩy.",
        QuestionType::Examples => "Đưa ra tối đa ba ví dụ cụ thể có trong tài liệu.",
        QuestionType::WhoWhat => "Trả lời trực tiếp người hoặc đối tượng được hỏi trong một câu.",
        QuestionType::Analysis => {
            "Phân tích ngắn gọn các khía cạnh chính trong tối đa bốn câu."
        }
        QuestionType::General => "Trả lời ngắn gọn và chính xác trong tối đa ba câu.",
    }
}

/// Build the generation prompt for one question.
///
/// The template depends on the question type; every template restricts the
/// model to the supplied context and forbids preambles and closing remarks.
#[inline]
pub fn build_prompt(question_type: QuestionType, question: &str, contexts: &[&str]) -> String {
    let context = contexts
        .iter()
        .enumerate()
        .map(|(i, segment)| format!("[{}] {}", i + 1, segment.trim()))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Bạn là trợ lý trả lời câu hỏi dựa trên tài liệu.\n\
         Chỉ sử dụng thông tin trong phần ngữ cảnh bên dưới.\n\
         {}\n\
         Không mở đầu bằng lời dẫn và không thêm lời kết.\n\
         Nếu ngữ cảnh không chứa câu trả lời, hãy nói \"không có thông tin\".\n\n\
         Ngữ cảnh:\n{}\n\n\
         Câu hỏi: {}\n\
         Trả lời:",
        instruction(question_type),
        context,
        question.trim()
    )
}

/// Whether generated text is usable as an answer
#[inline]
pub fn is_acceptable_answer(answer: &str) -> bool {
    let answer = answer.trim().to_lowercase();
    !answer.is_empty()
        && !NO_INFORMATION_PHRASES
            .iter()
            .any(|phrase| answer.contains(phrase))
}

/// Strip boilerplate, capitalize and cap the answer at `max_chars` characters
#[inline]
pub fn normalize_answer(answer: &str, max_chars: usize) -> String {
    let mut text = answer.trim();

    loop {
        let before = text;
        text = strip_prefix_ignore_case(text, ANSWER_PREFIXES).trim_start();
        text = strip_suffix_ignore_case(text, ANSWER_SUFFIXES).trim_end();
        if text == before {
            break;
        }
    }

    truncate_chars(&capitalize(text), max_chars)
}

/// The first `count` sentences of `text`, terminators included
#[inline]
pub fn leading_sentences(text: &str, count: usize) -> String {
    let mut sentences = Vec::with_capacity(count);
    let mut current = String::new();

    for c in text.trim().chars() {
        current.push(c);
        if matches!(c, '.' | '!' | '?' | '\n') {
            let sentence = current.trim().to_string();
            current.clear();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            if sentences.len() == count {
                break;
            }
        }
    }

    if sentences.len() < count {
        let rest = current.trim();
        if !rest.is_empty() {
            sentences.push(rest.to_string());
        }
    }

    sentences.join(" ")
}

fn capitalize(text: &str) -> String {
    let mut chars = text.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }

    let keep = max_chars.saturating_sub(TRUNCATION_MARKER.chars().count());
    let mut truncated: String = text.chars().take(keep).collect();
    truncated.truncate(truncated.trim_end().len());
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

// Case-insensitive prefix stripping that never splits a character
fn strip_prefix_ignore_case<'a>(text: &'a str, prefixes: &[&str]) -> &'a str {
    for prefix in prefixes {
        let prefix_chars = prefix.chars().count();
        let mut boundary = text.char_indices().map(|(i, _)| i).chain([text.len()]);
        let Some(end) = boundary.nth(prefix_chars) else {
            continue;
        };
        if let (Some(head), Some(rest)) = (text.get(..end), text.get(end..)) {
            if head.to_lowercase() == *prefix {
                return rest;
            }
        }
    }
    text
}

fn strip_suffix_ignore_case<'a>(text: &'a str, suffixes: &[&str]) -> &'a str {
    for suffix in suffixes {
        let suffix_chars = suffix.chars().count();
        let total = text.chars().count();
        if suffix_chars > total {
            continue;
        }
        let Some(start) = text
            .char_indices()
            .map(|(i, _)| i)
            .nth(total - suffix_chars)
        else {
            continue;
        };
        if let (Some(head), Some(tail)) = (text.get(..start), text.get(start..)) {
            if tail.to_lowercase() == *suffix {
                return head;
            }
        }
    }
    text
}
