// Bigram (Dice coefficient) similarity between free-text descriptions.

use std::collections::HashMap;

/// Dice coefficient over character bigrams, case- and whitespace-insensitive.
///
/// Two empty strings score 1.0, one empty string scores 0.0. Bigrams are
/// counted as a multiset, so repeated pairs only match as often as they occur
/// in both inputs.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);

    if a == b {
        return 1.0;
    }
    if a.len() < 2 || b.len() < 2 {
        return 0.0;
    }

    let mut first: HashMap<(char, char), usize> = HashMap::new();
    for pair in a.windows(2) {
        *first.entry((pair[0], pair[1])).or_default() += 1;
    }

    let mut intersection = 0usize;
    for pair in b.windows(2) {
        if let Some(count) = first.get_mut(&(pair[0], pair[1])) {
            if *count > 0 {
                *count -= 1;
                intersection += 1;
            }
        }
    }

    let total = (a.len() - 1) + (b.len() - 1);
    (2 * intersection) as f64 / total as f64
}

fn normalize(text: &str) -> Vec<char> {
    text.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}
