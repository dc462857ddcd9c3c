use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

/// Characters after the matched street that are searched for a house number.
const WINDOW_CHARS: usize = 80;
const YEAR_RANGE: std::ops::RangeInclusive<u32> = 1900..=2099;

static MARKED_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:^|[,\s])(?:house|h\.|building|bldg\.?|bld\.?|дома|дом|д\.?)\s*(\d+[a-zа-яё]?(?:/\d+)?)\b",
    )
    .expect("marked house number pattern")
});

static HYPHENATED_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^-(\d+[a-zа-яё]?(?:/\d+)?)\b").expect("hyphenated house number pattern")
});

static BARE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[,\s]+(\d+[a-zа-яё]?(?:/\d+)?)\b").expect("bare house number pattern")
});

/// Finds the house number that follows `matched_phrase` in `text`.
///
/// Only the first occurrence of the phrase is inspected. A bare number that looks like a
/// calendar year is rejected; numbers introduced by a house marker or a hyphen are not.
pub fn extract(text: &str, matched_phrase: &str) -> Option<String> {
    let phrase = matched_phrase.trim().to_lowercase();
    if phrase.is_empty() {
        return None;
    }
    let folded = text.to_lowercase();
    let start = folded.find(&phrase)? + phrase.len();
    let window = leading_chars(&folded[start..], WINDOW_CHARS);

    if let Some(number) = first_capture(&MARKED_NUMBER, window) {
        debug!(target: "building", number, "house number after marker");
        return Some(number);
    }
    if let Some(number) = first_capture(&HYPHENATED_NUMBER, window) {
        debug!(target: "building", number, "hyphenated house number");
        return Some(number);
    }
    let number = first_capture(&BARE_NUMBER, window)?;
    if looks_like_year(&number) {
        debug!(target: "building", number, "bare number rejected as a year");
        return None;
    }
    debug!(target: "building", number, "bare house number");
    Some(number)
}

fn first_capture(pattern: &Regex, haystack: &str) -> Option<String> {
    pattern
        .captures(haystack)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn looks_like_year(number: &str) -> bool {
    number
        .parse::<u32>()
        .map(|value| YEAR_RANGE.contains(&value))
        .unwrap_or(false)
}

fn leading_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((end, _)) => &text[..end],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_after_building_marker() {
        assert_eq!(
            extract("lenina street, building 5", "lenina").as_deref(),
            Some("5")
        );
    }

    #[test]
    fn rejects_publication_year() {
        assert_eq!(extract("lenina, 1987", "lenina"), None);
    }

    #[test]
    fn hyphen_joins_number() {
        assert_eq!(extract("lenina-5", "lenina").as_deref(), Some("5"));
        assert_eq!(extract("Lenina-2001", "lenina").as_deref(), Some("2001"));
    }

    #[test]
    fn marker_keeps_year_like_numbers() {
        assert_eq!(
            extract("on Lenina, house 1990", "lenina").as_deref(),
            Some("1990")
        );
    }

    #[test]
    fn keeps_letter_suffix_and_fraction() {
        assert_eq!(
            extract("улица Ленина, д. 10а", "ленина").as_deref(),
            Some("10а")
        );
        assert_eq!(
            extract("проспект Ломоносова, 202/1 закрыт", "ломоносова").as_deref(),
            Some("202/1")
        );
        assert_eq!(
            extract("на Троицком, дом 55", "троицком").as_deref(),
            Some("55")
        );
    }

    #[test]
    fn bare_number_after_comma() {
        assert_eq!(
            extract("На Воскресенской, 20 сбили пешехода", "воскресенской").as_deref(),
            Some("20")
        );
    }

    #[test]
    fn ignores_numbers_outside_window() {
        let text = format!("lenina{} 7", " ".repeat(WINDOW_CHARS + 5));
        assert_eq!(extract(&text, "lenina"), None);
    }

    #[test]
    fn missing_phrase_or_number() {
        assert_eq!(extract("pobedy street closed", "lenina"), None);
        assert_eq!(extract("lenina street closed", "lenina"), None);
        assert_eq!(extract("lenina 5", "  "), None);
    }
}
