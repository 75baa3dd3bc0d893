//! Recovery-phrase generation and normalization.
//!
//! A phrase is 16 words drawn from a fixed 256-word list (8 bits per word,
//! 128 bits of entropy), joined with dashes. The normalized form — lowercase,
//! single-dash separated — is the canonical KDF input, so users may retype a
//! phrase with any casing or separator and still unwrap the recovery wrapper.

use rand::RngCore;

/// Number of words in a generated phrase (16 × 8 bits = 128 bits).
pub const WORD_COUNT: usize = 16;

/// 256 distinct, unambiguous lowercase words.
const WORDS: [&str; 256] = [
    "acid", "acorn", "agent", "alarm", "amber", "anchor", "angle", "apple",
    "april", "arena", "argon", "arrow", "aspen", "atlas", "atom", "autumn",
    "badge", "bagel", "bamboo", "banjo", "barrel", "basil", "beacon", "berry",
    "birch", "bison", "blade", "blaze", "bloom", "bolt", "bonus", "brass",
    "brave", "bread", "brick", "bridge", "brook", "bronze", "butter", "cabin",
    "cable", "cactus", "camel", "canoe", "canvas", "carbon", "cargo", "carrot",
    "castle", "cedar", "chalk", "cherry", "chess", "cider", "cinema", "citrus",
    "clay", "cliff", "clover", "cobalt", "cocoa", "comet", "copper", "coral",
    "cotton", "cougar", "crane", "crater", "cream", "crisp", "crown", "cubic",
    "cumin", "cycle", "daisy", "dawn", "delta", "denim", "desert", "diesel",
    "dome", "donor", "dragon", "drift", "drum", "dune", "dusk", "eagle",
    "earth", "ebony", "echo", "elbow", "elm", "ember", "engine", "envoy",
    "epoch", "fable", "falcon", "fern", "ferry", "fiber", "field", "fig",
    "finch", "fjord", "flame", "flint", "flora", "flute", "forest", "fossil",
    "frost", "galaxy", "garlic", "gecko", "geyser", "ginger", "glade", "glass",
    "globe", "gorge", "grape", "gravel", "grove", "guitar", "gulf", "habit",
    "harbor", "hawk", "hazel", "heron", "hill", "honey", "hotel", "husk",
    "igloo", "indigo", "ingot", "iris", "iron", "island", "ivory", "jade",
    "jasper", "jungle", "kayak", "kernel", "kiwi", "knoll", "lagoon", "lark",
    "laurel", "lava", "lemon", "lentil", "lilac", "lily", "linen", "lotus",
    "lumber", "lunar", "lynx", "magnet", "mango", "maple", "marble", "marsh",
    "meadow", "melon", "mesa", "mint", "mocha", "moss", "motor", "mural",
    "myrtle", "nectar", "nickel", "noble", "north", "nova", "nutmeg", "oasis",
    "ocean", "olive", "onyx", "opal", "orbit", "orchid", "otter", "owl",
    "oxide", "oyster", "palm", "panda", "paper", "pearl", "pebble", "pecan",
    "pepper", "petal", "pilot", "pine", "plasma", "plaza", "plum", "polar",
    "poppy", "prism", "pulse", "quartz", "quill", "radar", "raven", "reef",
    "ridge", "river", "robin", "rocket", "sage", "salmon", "sand", "satin",
    "shadow", "shale", "sierra", "silver", "slate", "solar", "sonnet", "spark",
    "spruce", "squid", "stone", "storm", "sugar", "summit", "sunset", "swan",
    "talon", "tempo", "thorn", "tiger", "timber", "topaz", "torch", "tulip",
    "tundra", "turnip", "velvet", "violet", "walnut", "willow", "winter", "zephyr",
];

/// Generate a fresh 16-word recovery phrase.
#[must_use]
pub fn generate_phrase() -> String {
    let mut entropy = [0u8; WORD_COUNT];
    rand::rng().fill_bytes(&mut entropy);

    entropy
        .iter()
        .map(|b| WORDS[*b as usize])
        .collect::<Vec<_>>()
        .join("-")
}

/// Canonicalize a user-typed phrase: lowercase, words joined by single dashes.
#[must_use]
pub fn normalize_phrase(phrase: &str) -> String {
    phrase
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::collections::HashSet};

    #[test]
    fn word_list_has_no_duplicates() {
        let unique: HashSet<&str> = WORDS.iter().copied().collect();
        assert_eq!(unique.len(), WORDS.len());
    }

    #[test]
    fn generated_phrase_has_sixteen_known_words() {
        let phrase = generate_phrase();
        let words: Vec<&str> = phrase.split('-').collect();
        assert_eq!(words.len(), WORD_COUNT);
        for word in words {
            assert!(WORDS.contains(&word), "unknown word: {word}");
        }
    }

    #[test]
    fn phrases_are_unique() {
        assert_ne!(generate_phrase(), generate_phrase());
    }

    #[test]
    fn normalize_accepts_spaces_and_case() {
        let phrase = "Amber  Brook\tCedar-dawn";
        assert_eq!(normalize_phrase(phrase), "amber-brook-cedar-dawn");
    }

    #[test]
    fn normalize_is_identity_on_generated() {
        let phrase = generate_phrase();
        assert_eq!(normalize_phrase(&phrase), phrase);
    }
}
