//! Grade and semester markers.

use std::sync::LazyLock;

use regex::Regex;

// Accepts class codes such as "10A1" or "12C" after the grade.
static GRADE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:lớp|khối|grade|class)\s*[-:]?\s*(10|11|12)(?:[a-z]\d{0,2})?\b")
        .unwrap_or_else(|e| panic!("grade pattern must compile: {e}"))
});

static SEMESTER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:học\s*kỳ|học\s*kì|hk|semester)\s*[-:]?\s*(ii|i|1|2)\b")
        .unwrap_or_else(|e| panic!("semester pattern must compile: {e}"))
});

/// First grade marker (10, 11 or 12) in `text`.
pub fn detect_grade(text: &str) -> Option<u8> {
    GRADE_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// First semester marker (1 or 2) in `text`. Accepts roman numerals.
pub fn detect_semester(text: &str) -> Option<u8> {
    let caps = SEMESTER_RE.captures(text)?;
    match caps.get(1)?.as_str().to_ascii_lowercase().as_str() {
        "1" | "i" => Some(1),
        "2" | "ii" => Some(2),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grade_markers() {
        assert_eq!(detect_grade("Giáo án lớp 10 chương 2"), Some(10));
        assert_eq!(detect_grade("Đề kiểm tra Khối 12"), Some(12));
        assert_eq!(detect_grade("grade-11 lesson plan"), Some(11));
        assert_eq!(detect_grade("lớp11"), Some(11));
    }

    #[test]
    fn class_codes_carry_the_grade() {
        assert_eq!(detect_grade("Bài kiểm tra cho lớp 10A1"), Some(10));
        assert_eq!(detect_grade("lớp 12c, học kỳ 2"), Some(12));
        assert_eq!(detect_grade("Lớp 11B12"), Some(11));
        assert_eq!(detect_grade("lớp 10abc"), None);
    }

    #[test]
    fn out_of_range_grades_are_ignored() {
        assert_eq!(detect_grade("lớp 9"), None);
        assert_eq!(detect_grade("lớp 120 học sinh"), None);
        assert_eq!(detect_grade("10 bài tập"), None);
    }

    #[test]
    fn semester_markers() {
        assert_eq!(detect_semester("ôn tập học kỳ 2"), Some(2));
        assert_eq!(detect_semester("Học kì 1"), Some(1));
        assert_eq!(detect_semester("đề thi HK II"), Some(2));
        assert_eq!(detect_semester("HKI"), Some(1));
        assert_eq!(detect_semester("semester 2 review"), Some(2));
    }

    #[test]
    fn no_semester_marker() {
        assert_eq!(detect_semester("học kỳ 3"), None);
        assert_eq!(detect_semester("bài học về điện trường"), None);
    }
}
