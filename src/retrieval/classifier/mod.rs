
use fancy_regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Broad shape of a question; drives the similarity gate and the prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuestionType {
    Definition,
    Comparison,
    Procedure,
    CauseEffect,
    Historical,
    Listing,
    Examples,
    WhoWhat,
    Analysis,
    General,
}

impl QuestionType {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Definition => "definition",
            Self::Comparison => "comparison",
            Self::Procedure => "procedure",
            Self::CauseEffect => "cause-effect",
            Self::Historical => "historical",
            Self::Listing => "listing",
            Self::Examples => "examples",
            Self::WhoWhat => "who-what",
            Self::Analysis => "analysis",
            Self::General => "general",
        }
    }
}

impl fmt::Display for QuestionType {
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Checked in order; the first matching rule wins
static RULES: LazyLock<Vec<(QuestionType, Regex)>> = LazyLock::new(|| {
    vec![
        (
            QuestionType::Definition,
            Regex::new(
                r"là gì|nghĩa là gì|định nghĩa|khái niệm|^what (is|are)\b(?! the differences? between)|^what does .+ mean|^define\b|\bmeaning of\b",
            )
            .expect("valid regex"),
        ),
        (
            QuestionType::Comparison,
            Regex::new(
                r"so sánh|khác nhau|khác gì|giống nhau|điểm khác|\bdiffer(ence|ent)?s?\b|\bcompare\b|\bversus\b|\bvs\.?\s|\bbetter than\b",
            )
            .expect("valid regex"),
        ),
        (
            QuestionType::Procedure,
            Regex::new(
                r"làm thế nào|làm sao|bằng cách nào|cách (để|làm)|các bước|quy trình|hướng dẫn|^how (do|to|can|should)\b|\bsteps?\b|\bprocedure\b",
            )
            .expect("valid regex"),
        ),
        (
            QuestionType::CauseEffect,
            Regex::new(
                r"tại sao|vì sao|nguyên nhân|hậu quả|ảnh hưởng|dẫn đến|^why\b|\bcause[sd]?\b|\beffects? of\b|\bleads? to\b|\bresults? in\b",
            )
            .expect("valid regex"),
        ),
        (
            QuestionType::Historical,
            Regex::new(
                r"khi nào|năm nào|lịch sử|nguồn gốc|xuất xứ|ra đời|^when\b|\bhistory\b|\borigins?\b|\bfounded\b",
            )
            .expect("valid regex"),
        ),
        (
            QuestionType::Listing,
            Regex::new(
                r"liệt kê|các loại|những loại|kể tên|bao gồm những|^list\b|\btypes of\b|\bkinds of\b",
            )
            .expect("valid regex"),
        ),
        (
            QuestionType::Examples,
            Regex::new(r"ví dụ|minh họa|\bexamples?\b|\bfor instance\b|\bsuch as\b")
                .expect("valid regex"),
        ),
        (
            QuestionType::WhoWhat,
            Regex::new(r"là ai|ai là|người nào|^who\b|^which\b").expect("valid regex"),
        ),
        (
            QuestionType::Analysis,
            Regex::new(
                r"phân tích|đánh giá|nhận xét|ưu điểm|nhược điểm|\banaly[sz]e\b|\bevaluate\b|\bpros and cons\b|\badvantages?\b",
            )
            .expect("valid regex"),
        ),
    ]
});

// Each pattern captures the subject in group 1
static SUBJECT_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"^what (?:is|are)\s+(?:an?\s+|the\s+)?(.+?)$").expect("valid regex"),
        Regex::new(r"^what does\s+(.+?)\s+mean$").expect("valid regex"),
        Regex::new(r"^(?:khái niệm\s+|định nghĩa\s+)?(.+?)\s+(?:có nghĩa là|nghĩa là|là)(?:\s|$)")
            .expect("valid regex"),
        Regex::new(r"^(?:define|định nghĩa|khái niệm)\s+(.+?)$").expect("valid regex"),
        Regex::new(r"^(.+?)\s+(?:is defined as|defined as|means|is)(?:\s|$)").expect("valid regex"),
    ]
});

/// Classify a question by the first rule that matches it
#[inline]
pub fn classify(question: &str) -> QuestionType {
    let question = question.trim().to_lowercase();

    RULES
        .iter()
        .find(|(_, pattern)| pattern.is_match(&question).unwrap_or(false))
        .map_or(QuestionType::General, |(question_type, _)| *question_type)
}

/// Subject phrase of a definitional question, lower-cased.
///
/// "Phở là gì?" gives `phở`, "What is a closure?" gives `closure`.
#[inline]
pub fn definition_subject(question: &str) -> Option<String> {
    let question = question
        .trim()
        .trim_end_matches(|c: char| c.is_ascii_punctuation() || c.is_whitespace())
        .to_lowercase();

    SUBJECT_PATTERNS.iter().find_map(|pattern| {
        let captures = pattern.captures(&question).ok().flatten()?;
        let subject = captures.get(1)?.as_str().trim();
        (!subject.is_empty()).then(|| subject.to_string())
    })
}
