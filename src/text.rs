use serde::{ Deserialize, Serialize };

use crate::capability::RawFragment;

/// Leading characters left alone by digit correction, they usually carry a
/// region or state code.
pub const PREFIX_LEN: usize = 2;

/// Letter to digit corrections applied past the prefix.
const SUBSTITUTIONS: [(char, char); 4] = [('O', '0'), ('I', '1'), ('S', '5'), ('Q', '0')];

/// How recognizer fragments are merged before normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "policy")]
pub enum MergePolicy {
    /// Every fragment, in emission order.
    ConcatenateAll,
    /// Drop fragments shorter than `min_len` after stripping; stray marks,
    /// frame edges and bolt holes tend to come back as one or two characters.
    FilteredJoin { min_len: usize },
}

impl Default for MergePolicy {
    fn default() -> Self {
        MergePolicy::FilteredJoin { min_len: 3 }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TextNormalizer {
    policy: MergePolicy,
}

impl TextNormalizer {

    pub fn new(policy: MergePolicy) -> Self {
        Self { policy }
    }

    /// Merge `fragments` according to the policy and normalize the result.
    /// An empty string means no legible text.
    pub fn merge(&self, fragments: &[RawFragment]) -> String {
        let joined: String = match self.policy {
            MergePolicy::ConcatenateAll => fragments.iter().map(|f| f.text.as_str()).collect(),
            MergePolicy::FilteredJoin { min_len } => fragments
                .iter()
                .map(|f| strip(&f.text))
                .filter(|s| s.len() >= min_len)
                .collect(),
        };
        normalize(&joined)
    }
}

/// Uppercase and keep only `A-Z0-9`.
pub fn strip(text: &str) -> String {
    text.to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .collect()
}

/// Canonical plate code: stripped, then digit corrected past the prefix.
pub fn normalize(text: &str) -> String {
    strip(text)
        .chars()
        .enumerate()
        .map(|(i, c)| if i < PREFIX_LEN { c } else { substitute(c) })
        .collect()
}

fn substitute(c: char) -> char {
    SUBSTITUTIONS
        .iter()
        .find(|(from, _)| *from == c)
        .map(|(_, to)| *to)
        .unwrap_or(c)
}
