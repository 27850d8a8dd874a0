use serde::{Deserialize, Serialize};

use crate::mood;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SenseType {
    See,
    Hear,
    Touch,
    Smell,
    Taste,
}

/// Exercise order: five things seen down to one thing tasted.
pub const SENSE_ORDER: [SenseType; 5] = [
    SenseType::See,
    SenseType::Hear,
    SenseType::Touch,
    SenseType::Smell,
    SenseType::Taste,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseConfig {
    pub label: &'static str,
    pub count: u8,
    pub instruction: &'static str,
}

impl SenseType {
    pub fn config(self) -> SenseConfig {
        match self {
            SenseType::See => SenseConfig {
                label: "See",
                count: 5,
                instruction: "Look around and name 5 things you can see.",
            },
            SenseType::Hear => SenseConfig {
                label: "Hear",
                count: 4,
                instruction: "Close your eyes if you like. Name 4 things you can hear.",
            },
            SenseType::Touch => SenseConfig {
                label: "Touch",
                count: 3,
                instruction: "Notice your body. Name 3 things you can touch or feel.",
            },
            SenseType::Smell => SenseConfig {
                label: "Smell",
                count: 2,
                instruction: "Name 2 things you can smell right now.",
            },
            SenseType::Taste => SenseConfig {
                label: "Taste",
                count: 1,
                instruction: "Name 1 thing you can taste.",
            },
        }
    }

    pub fn placeholder(self) -> String {
        format!("Say what you {}...", self.config().label.to_lowercase())
    }

    pub fn at_step(step: usize) -> Option<SenseType> {
        SENSE_ORDER.get(step).copied()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroundingData {
    #[serde(rename = "SEE", default)]
    pub see: String,
    #[serde(rename = "HEAR", default)]
    pub hear: String,
    #[serde(rename = "TOUCH", default)]
    pub touch: String,
    #[serde(rename = "SMELL", default)]
    pub smell: String,
    #[serde(rename = "TASTE", default)]
    pub taste: String,
}

impl GroundingData {
    pub fn get(&self, sense: SenseType) -> &str {
        match sense {
            SenseType::See => &self.see,
            SenseType::Hear => &self.hear,
            SenseType::Touch => &self.touch,
            SenseType::Smell => &self.smell,
            SenseType::Taste => &self.taste,
        }
    }

    pub fn set(&mut self, sense: SenseType, text: String) {
        let slot = match sense {
            SenseType::See => &mut self.see,
            SenseType::Hear => &mut self.hear,
            SenseType::Touch => &mut self.touch,
            SenseType::Smell => &mut self.smell,
            SenseType::Taste => &mut self.taste,
        };
        *slot = text;
    }

    /// Non-empty answers in exercise order.
    pub fn answered(&self) -> impl Iterator<Item = (SenseType, &str)> {
        SENSE_ORDER
            .iter()
            .map(move |sense| (*sense, self.get(*sense)))
            .filter(|(_, text)| !text.is_empty())
    }
}

/// In-progress exercise state, discarded once saved or abandoned.
#[derive(Debug, Clone, PartialEq)]
pub struct GroundingSession {
    pub data: GroundingData,
    pub pre_mood: f64,
    pub post_mood: f64,
    pub generated_image: Option<String>,
    pub current_step: usize,
}

impl Default for GroundingSession {
    fn default() -> Self {
        Self {
            data: GroundingData::default(),
            pre_mood: mood::NEUTRAL,
            post_mood: mood::NEUTRAL,
            generated_image: None,
            current_step: 0,
        }
    }
}

impl GroundingSession {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn current_sense(&self) -> Option<SenseType> {
        SenseType::at_step(self.current_step)
    }

    pub fn is_last_step(&self) -> bool {
        self.current_step + 1 >= SENSE_ORDER.len()
    }

    pub fn update_current(&mut self, text: String) {
        if let Some(sense) = self.current_sense() {
            self.data.set(sense, text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_descend_from_five_to_one() {
        let counts = SENSE_ORDER
            .iter()
            .map(|sense| sense.config().count)
            .collect::<Vec<_>>();
        assert_eq!(counts, vec![5, 4, 3, 2, 1]);
    }

    #[test]
    fn placeholder_uses_lowercase_label() {
        assert_eq!(SenseType::Smell.placeholder(), "Say what you smell...");
    }

    #[test]
    fn deserializes_uppercase_sense_keys() {
        let json = r#"{"SEE":"a lamp","HEAR":"rain","TOUCH":"","SMELL":"tea","TASTE":"mint"}"#;
        let data: GroundingData = serde_json::from_str(json).expect("grounding data should parse");
        assert_eq!(data.get(SenseType::See), "a lamp");
        assert_eq!(data.get(SenseType::Taste), "mint");

        let answered = data.answered().map(|(sense, _)| sense).collect::<Vec<_>>();
        assert_eq!(
            answered,
            vec![SenseType::See, SenseType::Hear, SenseType::Smell, SenseType::Taste]
        );
    }

    #[test]
    fn session_updates_the_current_step_only() {
        let mut session = GroundingSession::default();
        session.current_step = 2;
        session.update_current("cold mug".to_string());
        assert_eq!(session.data.touch, "cold mug");
        assert!(session.data.see.is_empty());
        assert!(!session.is_last_step());

        session.current_step = 4;
        assert!(session.is_last_step());
        session.reset();
        assert_eq!(session, GroundingSession::default());
    }
}
