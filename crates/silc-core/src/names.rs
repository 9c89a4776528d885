//! Session name grammar and generation.
//!
//! Names match `^[a-z][a-z0-9-]*[a-z0-9]$` with length >= 2. Auto-generated
//! names follow `<adjective>-<noun>-<0..99>` over a fixed vocabulary.

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;

static NAME_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z][a-z0-9-]*[a-z0-9]$").expect("name regex"));

const ADJECTIVES: &[&str] = &[
    "amber", "ancient", "bold", "brave", "bright", "brisk", "calm", "clever", "cosmic", "crimson",
    "curious", "daring", "deep", "dusty", "eager", "early", "electric", "fearless", "fierce",
    "fleet", "frosty", "gentle", "gilded", "golden", "happy", "hidden", "humble", "icy", "jolly",
    "keen", "lively", "lone", "lucky", "mellow", "mighty", "misty", "noble", "nimble", "patient",
    "polished", "proud", "quiet", "rapid", "restless", "rough", "rustic", "sharp", "silent",
    "silver", "sleepy", "smooth", "solar", "steady", "stormy", "swift", "tidal", "vivid", "wild",
    "wise", "young",
];

const NOUNS: &[&str] = &[
    "badger", "bear", "beacon", "canyon", "cedar", "comet", "condor", "coral", "crane", "creek",
    "delta", "dune", "eagle", "ember", "falcon", "fern", "finch", "fjord", "fox", "glacier",
    "grove", "harbor", "hawk", "heron", "island", "jaguar", "lagoon", "lark", "lynx", "maple",
    "marlin", "meadow", "mesa", "moose", "otter", "owl", "panther", "pine", "prairie", "puma",
    "raven", "reef", "ridge", "river", "salmon", "sparrow", "spruce", "summit", "swan", "thicket",
    "tiger", "trail", "tundra", "valley", "walrus", "wave", "willow", "wolf", "wren", "zephyr",
];

/// Validate a user-supplied session name against the grammar.
pub fn is_valid_name(name: &str) -> bool {
    name.len() >= 2 && NAME_PATTERN.is_match(name)
}

/// Generate a random `<adjective>-<noun>-<0..99>` name.
pub fn generate_name() -> String {
    let mut rng = rand::thread_rng();
    let adjective = ADJECTIVES[rng.gen_range(0..ADJECTIVES.len())];
    let noun = NOUNS[rng.gen_range(0..NOUNS.len())];
    let number: u8 = rng.gen_range(0..100);
    format!("{adjective}-{noun}-{number}")
}

/// Random lowercase-hex string, used for session ids and run tokens.
pub fn random_hex(len: usize) -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vocabulary_is_large_enough() {
        assert!(ADJECTIVES.len() + NOUNS.len() >= 100);
    }

    #[test]
    fn test_generated_names_satisfy_grammar() {
        for _ in 0..200 {
            let name = generate_name();
            assert!(is_valid_name(&name), "bad generated name: {name}");
        }
    }

    #[test]
    fn test_grammar_rejects_bad_names() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("a"));
        assert!(!is_valid_name("-lead"));
        assert!(!is_valid_name("trailing-"));
        assert!(!is_valid_name("Upper-case"));
        assert!(!is_valid_name("under_score"));
        assert!(!is_valid_name("9starts-with-digit"));
    }

    #[test]
    fn test_grammar_accepts_good_names() {
        assert!(is_valid_name("ab"));
        assert!(is_valid_name("alpha-wolf-7"));
        assert!(is_valid_name("x9"));
        assert!(is_valid_name("dev-box-42"));
    }

    #[test]
    fn test_random_hex_has_requested_length() {
        let token = random_hex(8);
        assert_eq!(token.len(), 8);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
