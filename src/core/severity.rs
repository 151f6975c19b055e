use crate::database::models::{Category, Severity};

pub const DANGER_KEYWORDS: [&str; 7] = [
    "danger",
    "accident",
    "injury",
    "emergency",
    "urgent",
    "critical",
    "severe",
];

pub const HIGH_PRIORITY_CATEGORIES: [Category; 4] = [
    Category::Pothole,
    Category::Streetlight,
    Category::WaterLeakage,
    Category::Drainage,
];

/// Substrings of classifier labels that indicate visible damage.
pub const DAMAGE_LABEL_TERMS: [&str; 3] = ["pothole", "damage", "broken"];

/// Raw rule score before tier mapping.
pub fn severity_score(
    description: &str,
    category: Category,
    classifier_labels: &[String],
) -> u8 {
    let mut score = 1;

    let description = description.to_lowercase();
    if DANGER_KEYWORDS.iter().any(|k| description.contains(k)) {
        score += 2;
    }

    if HIGH_PRIORITY_CATEGORIES.contains(&category) {
        score += 1;
    }

    let damage_seen = classifier_labels.iter().any(|label| {
        let label = label.to_lowercase();
        DAMAGE_LABEL_TERMS.iter().any(|term| label.contains(term))
    });
    if damage_seen {
        score += 1;
    }

    score
}

pub fn assess_severity(
    description: &str,
    category: Category,
    classifier_labels: &[String],
) -> Severity {
    Severity::from_score(severity_score(description, category, classifier_labels))
}
