use once_cell::sync::Lazy;
use regex::Regex;

pub const DEFAULT_WEIGHT_KG: f64 = 0.5;

/// Keywords marking a weight or capacity row in a product detail table.
pub const WEIGHT_KEYWORDS: &[&str] = &["중량", "무게", "용량"];

// Volume units are taken as mass at water density (1 ml ≈ 1 g).
const UNIT_TO_KG: &[(&str, f64)] = &[
    ("kg", 1.0),
    ("g", 0.001),
    ("ml", 0.001),
    ("l", 1.0),
];

static WEIGHT_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\d+(?:\.\d+)?)\s*(kg|ml|g|l)(?:[^a-z]|$)").expect("weight pattern")
});

/// Kilograms for a free-text weight label such as `"약 500g"` or `"1.2 kg"`.
/// Falls back to [`DEFAULT_WEIGHT_KG`] when nothing parses.
pub fn parse_weight_kg(raw: Option<&str>) -> f64 {
    raw.and_then(weight_from_label).unwrap_or(DEFAULT_WEIGHT_KG)
}

/// Kilograms when the label parses to a positive weight.
pub fn weight_from_label(raw: &str) -> Option<f64> {
    let cleaned = raw.replace(',', "").replace('약', "");
    let caps = WEIGHT_PATTERN.captures(&cleaned)?;
    let number: f64 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_lowercase();
    let factor = UNIT_TO_KG
        .iter()
        .find(|(key, _)| *key == unit)
        .map(|(_, factor)| *factor)?;
    let kg = number * factor;
    if kg > 0.0 { Some(kg) } else { None }
}

pub fn is_weight_key(key: &str) -> bool {
    WEIGHT_KEYWORDS.iter().any(|kw| key.contains(kw))
}

pub fn round_two(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
