//! Title heuristics for posts unlikely to show an identifiable poster.
//! Matching posts are marked processed without spending an oracle call.

use once_cell::sync::Lazy;
use regex::RegexSet;

static UNLIKELY_SUBJECT: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        // meta / moderation posts
        r"(?i)^\s*[\[\(]?\s*(meta|mod post|mod announcement|announcement|psa)\s*[\]\):]",
        r"(?i)\b(weekly|daily|monthly)\s+(thread|discussion|megathread)\b",
        r"(?i)\bmegathread\b",
        r"(?i)\bsub(reddit)?\s+(rules?|update|survey|announcement)\b",
        // rhetorical questions aimed at the community
        r"(?i)^\s*(why (do|are) (people|so many|we|recruiters)|how come|does anyone|anyone else|is it just me|am i the only|what do you (all )?think|who else)\b.*\?\s*$",
    ])
    .expect("prefilter regex set")
});

/// `true` when the title suggests there is no single poster to identify.
pub fn is_unlikely_subject(title: &str) -> bool {
    UNLIKELY_SUBJECT.is_match(title)
}
