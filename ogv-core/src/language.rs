//! Language tag matching for audio stream selection.
//!
//! Streams advertise a `LANGUAGE=` comment with a BCP-47 style short tag
//! ("en", "en-US"). The host configures a preference in the same shape and
//! the selector ranks candidates by how far the two tags agree.

/// Outcome of comparing a configured preference against a stream tag.
///
/// Ordering is meaningful: a later variant always beats an earlier one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LanguageMatch {
    /// No preference configured, or the language codes differ.
    None,
    /// The two-letter language codes agree.
    LangCode,
    /// The language codes agree and the tags have equal length.
    LangCodeExact,
    /// Language code, separator and two-letter country code all agree.
    LangAndCountry,
}

/// Compares a preference tag against a candidate tag.
///
/// The comparison walks the tags through three stages: the two-letter
/// language code, the `-` separator, and the two-letter country code.
/// Divergence in the first stage yields [`LanguageMatch::None`]; divergence
/// past it yields [`LanguageMatch::LangCode`]. Malformed tags never panic,
/// they just stop matching early.
pub fn check_language(preference: &str, candidate: &str) -> LanguageMatch {
    let want = preference.as_bytes();
    let have = candidate.as_bytes();
    let shorter = want.len().min(have.len());

    // Stage 1: two-letter language code.
    if shorter < 2 || want[0] != have[0] || want[1] != have[1] {
        return LanguageMatch::None;
    }
    if shorter == 2 {
        return if want.len() == have.len() {
            LanguageMatch::LangCodeExact
        } else {
            LanguageMatch::LangCode
        };
    }

    // Stage 2: the separator must be '-' in both tags.
    if want[2] != have[2] || want[2] != b'-' {
        return LanguageMatch::LangCode;
    }

    // Stage 3: two-letter country code.
    if shorter < 5 || want[3] != have[3] || want[4] != have[4] {
        return LanguageMatch::LangCode;
    }
    LanguageMatch::LangAndCountry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_strengths_are_ordered() {
        assert!(LanguageMatch::None < LanguageMatch::LangCode);
        assert!(LanguageMatch::LangCode < LanguageMatch::LangCodeExact);
        assert!(LanguageMatch::LangCodeExact < LanguageMatch::LangAndCountry);
    }

    #[test]
    fn exact_tag_match() {
        assert_eq!(check_language("en", "en"), LanguageMatch::LangCodeExact);
        assert_eq!(
            check_language("en-US", "en-US"),
            LanguageMatch::LangAndCountry
        );
    }

    #[test]
    fn language_code_only() {
        // Same language, different or missing country.
        assert_eq!(check_language("en-GB", "en-US"), LanguageMatch::LangCode);
        assert_eq!(check_language("en-GB", "en"), LanguageMatch::LangCode);
        assert_eq!(check_language("en", "en-US"), LanguageMatch::LangCode);
        assert_eq!(check_language("en-", "en-"), LanguageMatch::LangCode);
    }

    #[test]
    fn mismatched_language() {
        assert_eq!(check_language("en-GB", "fr"), LanguageMatch::None);
        assert_eq!(check_language("de", "da"), LanguageMatch::None);
    }

    #[test]
    fn degenerate_inputs() {
        assert_eq!(check_language("", "en"), LanguageMatch::None);
        assert_eq!(check_language("en", ""), LanguageMatch::None);
        assert_eq!(check_language("e", "e"), LanguageMatch::None);
        assert_eq!(check_language("", ""), LanguageMatch::None);
    }

    #[test]
    fn separator_must_be_dash() {
        assert_eq!(check_language("en_US", "en_US"), LanguageMatch::LangCode);
    }
}
