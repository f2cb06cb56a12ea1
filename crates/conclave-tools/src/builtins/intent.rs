//! Keyword intent classification

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentKind {
    Generate,
    Query,
    Chat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Medium {
    Image,
    Music,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Intent {
    pub intent: IntentKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub medium: Option<Medium>,
}

impl Intent {
    fn generate(medium: Medium) -> Self {
        Self {
            intent: IntentKind::Generate,
            medium: Some(medium),
        }
    }

    fn plain(intent: IntentKind) -> Self {
        Self {
            intent,
            medium: None,
        }
    }
}

const QUERY_WORDS: [&str; 4] = ["select", "show", "find", "search"];

/// Classify a message. Deterministic, first matching rule wins.
pub fn analyze_intent(message: &str) -> Intent {
    let lower = message.to_lowercase();

    if lower.contains("/imagine") || lower.contains("generate image") {
        Intent::generate(Medium::Image)
    } else if lower.contains("/music") || lower.contains("generate music") {
        Intent::generate(Medium::Music)
    } else if QUERY_WORDS.iter().any(|word| lower.contains(word)) {
        Intent::plain(IntentKind::Query)
    } else {
        Intent::plain(IntentKind::Chat)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case("/imagine a red fox", Intent::generate(Medium::Image))]
    #[case("Please GENERATE IMAGE of a cat", Intent::generate(Medium::Image))]
    #[case("/music chill beats", Intent::generate(Medium::Music))]
    #[case("generate music for a rainy day", Intent::generate(Medium::Music))]
    #[case("show all images", Intent::plain(IntentKind::Query))]
    #[case("Find my latest work", Intent::plain(IntentKind::Query))]
    #[case("hello there", Intent::plain(IntentKind::Chat))]
    fn classifies(#[case] message: &str, #[case] expected: Intent) {
        assert_eq!(analyze_intent(message), expected);
    }

    #[test]
    fn image_beats_query_words() {
        assert_eq!(
            analyze_intent("/imagine search results"),
            Intent::generate(Medium::Image)
        );
    }

    #[test]
    fn serializes_without_medium_when_absent() {
        assert_eq!(
            serde_json::to_value(analyze_intent("hi")).unwrap(),
            json!({"intent": "chat"})
        );
        assert_eq!(
            serde_json::to_value(analyze_intent("/music")).unwrap(),
            json!({"intent": "generate", "medium": "music"})
        );
    }
}
