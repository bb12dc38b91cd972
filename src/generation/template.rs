use crate::extract::weight::DEFAULT_WEIGHT_KG;

pub const TITLE_MARKER: &str = "🎁";
pub const TITLE_LABEL: &str = "Item:";
pub const WEIGHT_MARKER: &str = "[WEIGHT]:";

const LISTING_TEMPLATE: &str = r#"You are a professional e-commerce copywriter for a Korean export shop.
Write a product listing that follows the template below exactly.

REQUIRED OUTPUT FORMAT:
💝 [EVENT] Follow our shop now and get a 5% discount coupon 💝

🎁 Item: [Made in Korea] {Translated product title}

🤍 Item: {Exact product name}

🤍 Description
{Concise description, at most 5 lines, focused on benefits}

🔍 Highlights
✅ {Feature 1}
✅ {Feature 2}
✅ {Feature 3}
✅ {Feature 4}
✅ {Feature 5}
✅ {Feature 6}

🔵 Specifications
📍 Material: {Material}
📍 Size: {Size}
📍 Components: {Components}
📍 Origin: Korea 🇰🇷

🏠✨ Shop Tip 🏠✨
{Practical usage tip}
{Storage or care tip}

😊 Shop Promise 😊
💛 All products ship directly from Korea 🇰🇷
💛 Fast and reliable delivery
💛 Every order is packed carefully and video-recorded
💛 Genuine products only
💛 Product requests are always welcome

RULES:
1. No double asterisks. Plain text only, no bold markup.
2. The 🎁 Item line must not contain extra colons or dashes.
3. Keep the 🤍 Description section under 5 lines.
4. Write everything in English.
5. The very last line must be exactly `[WEIGHT]: <kg>` with your best estimate of the shipping weight in kilograms. Numbers only.
"#;

/// Prompt parts for one listing, in send order.
pub fn listing_prompt(title: &str, instructions: Option<&str>) -> Vec<String> {
    let mut parts = vec![
        LISTING_TEMPLATE.to_string(),
        format!("Product Title (KR): {title}"),
    ];
    if let Some(extra) = instructions.map(str::trim).filter(|s| !s.is_empty()) {
        parts.push(format!("[USER INSTRUCTION]: {extra}"));
    }
    parts
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedListing {
    pub title: String,
    pub description: String,
    pub weight_kg: f64,
}

/// Splits a model response into title, description and weight. Never fails:
/// missing pieces fall back to the source title and the default weight.
pub fn parse_response(raw: &str, source_title: &str) -> ParsedListing {
    let text = raw.trim();
    let mut title = None;
    let mut weight_kg = DEFAULT_WEIGHT_KG;
    let mut kept = Vec::new();

    for line in text.lines() {
        if line.contains(TITLE_MARKER)
            && line.contains(TITLE_LABEL)
            && let Some(after) = line.split(TITLE_LABEL).nth(1)
        {
            let cleaned = after.replace("**", "").replace(':', "").trim().to_string();
            if !cleaned.is_empty() {
                title = Some(cleaned);
            }
        }
        if line.contains(WEIGHT_MARKER) {
            if let Some(weight) = parse_weight_line(line) {
                weight_kg = weight;
            }
            continue;
        }
        kept.push(line);
    }

    let description = kept
        .join("\n")
        .trim()
        .replace("```json", "")
        .replace("```", "")
        .replace("**", "")
        .trim()
        .to_string();
    let title = title.unwrap_or_else(|| source_title.to_string());
    // Nothing but markers or fences: the title stands in for the body.
    let description = if description.is_empty() {
        title.clone()
    } else {
        description
    };

    ParsedListing {
        title,
        description,
        weight_kg,
    }
}

fn parse_weight_line(line: &str) -> Option<f64> {
    let payload = line.split(':').nth(1)?;
    payload
        .replace("kg", "")
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|w| w.is_finite() && *w >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_carries_title_and_optional_instructions() {
        let parts = listing_prompt("순한 샴푸", Some("  강조: 저자극 "));
        assert_eq!(parts.len(), 3);
        assert!(parts[0].contains("[WEIGHT]"));
        assert_eq!(parts[1], "Product Title (KR): 순한 샴푸");
        assert_eq!(parts[2], "[USER INSTRUCTION]: 강조: 저자극");
        assert_eq!(listing_prompt("x", Some("   ")).len(), 2);
    }

    #[test]
    fn parses_title_weight_and_strips_markup() {
        let raw = "```\n🎁 Item: **Gentle Shampoo: 500ml**\n🤍 Description\nMild **daily** wash\n[WEIGHT]: 0.8\n```";
        let parsed = parse_response(raw, "테스트 샴푸");
        assert_eq!(parsed.title, "Gentle Shampoo 500ml");
        assert_eq!(parsed.weight_kg, 0.8);
        assert!(!parsed.description.contains("[WEIGHT]"));
        assert!(!parsed.description.contains("**"));
        assert!(!parsed.description.contains("```"));
        assert!(parsed.description.contains("🎁 Item"));
        assert!(parsed.description.contains("Mild daily wash"));
    }

    #[test]
    fn weight_accepts_unit_suffix_and_rejects_garbage() {
        assert_eq!(parse_response("body\n[WEIGHT]: 1.25kg", "t").weight_kg, 1.25);
        assert_eq!(parse_response("body\n[WEIGHT]: heavy", "t").weight_kg, 0.5);
        assert_eq!(parse_response("body\n[WEIGHT]:", "t").weight_kg, 0.5);
    }

    #[test]
    fn missing_title_line_keeps_source_title() {
        let parsed = parse_response("Item: not gifted\nplain text", "원래 제목");
        assert_eq!(parsed.title, "원래 제목");
        assert_eq!(parsed.description, "Item: not gifted\nplain text");
    }

    #[test]
    fn weight_only_response_falls_back_to_title() {
        let parsed = parse_response("[WEIGHT]: 2", "t");
        assert_eq!(parsed.weight_kg, 2.0);
        assert_eq!(parsed.description, "t");
    }

    #[test]
    fn fenced_weight_only_response_leaks_no_markup() {
        let parsed = parse_response("```\n[WEIGHT]: 0.8\n```", "테스트 샴푸");
        assert_eq!(parsed.weight_kg, 0.8);
        assert_eq!(parsed.description, "테스트 샴푸");
        assert!(!parsed.description.contains("[WEIGHT]"));
        assert!(!parsed.description.contains("```"));

        let titled = parse_response("**🎁 Item: Mild Shampoo**\n[WEIGHT]: 0.5kg", "원래");
        assert_eq!(titled.title, "Mild Shampoo");
        assert!(!titled.description.contains("[WEIGHT]"));
        assert!(!titled.description.contains("**"));
    }
}
