//! Coach modes, their system prompts and scripted welcome turns.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Which coach persona a session runs as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoachMode {
    #[default]
    General,
    Training,
    Nutrition,
    Fasting,
}

const SHARED_RULES: &str = "You are speaking with the user in real time. Keep replies short and \
conversational, one or two sentences unless the user asks for detail. Never give medical \
diagnoses; suggest a professional when symptoms sound serious.";

impl CoachMode {
    pub const ALL: [Self; 4] = [Self::General, Self::Training, Self::Nutrition, Self::Fasting];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Training => "training",
            Self::Nutrition => "nutrition",
            Self::Fasting => "fasting",
        }
    }

    /// One-line description for listings.
    pub const fn description(self) -> &'static str {
        match self {
            Self::General => "All-round wellness coach",
            Self::Training => "Workout planning, form cues and recovery",
            Self::Nutrition => "Meals, macros and healthy eating habits",
            Self::Fasting => "Fasting windows, hydration and breaking a fast",
        }
    }

    const fn persona(self) -> &'static str {
        match self {
            Self::General => {
                "You are FitCoach, a friendly wellness coach covering training, nutrition and fasting."
            }
            Self::Training => {
                "You are FitCoach in training mode, an energetic personal trainer. Help plan \
                 workouts, give clear form cues and adjust intensity to how the user feels."
            }
            Self::Nutrition => {
                "You are FitCoach in nutrition mode, a practical nutrition coach. Help the user \
                 choose meals, estimate portions and stay close to their goals without judgement."
            }
            Self::Fasting => {
                "You are FitCoach in fasting mode, a calm fasting coach. Help the user through \
                 their fasting window, remind them to hydrate and advise on breaking the fast gently."
            }
        }
    }

    /// Instructions sent in `session.update` and with the offer.
    pub fn system_prompt(self, user_name: Option<&str>) -> String {
        let mut prompt = format!("{} {SHARED_RULES}", self.persona());
        if let Some(name) = clean_name(user_name) {
            prompt.push_str(&format!(" The user's name is {name}; use it naturally."));
        }
        prompt
    }

    /// The scripted first turn sent after configuration.
    pub fn welcome_text(self, user_name: Option<&str>) -> String {
        let greeting = clean_name(user_name).map_or_else(|| "Hi".to_string(), |n| format!("Hi, I'm {n}"));
        match self {
            Self::General => format!("{greeting}. Greet me briefly and ask how you can help today."),
            Self::Training => format!(
                "{greeting}. I'm ready to train. Greet me and ask what workout we're doing today."
            ),
            Self::Nutrition => format!(
                "{greeting}. Greet me and ask what I've eaten today or what meal I'm planning."
            ),
            Self::Fasting => format!(
                "{greeting}. Greet me and ask where I am in my fasting window and how I feel."
            ),
        }
    }
}

fn clean_name(name: Option<&str>) -> Option<&str> {
    name.map(str::trim).filter(|n| !n.is_empty())
}

impl fmt::Display for CoachMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoachMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                format!("unknown coach mode '{s}' (expected general, training, nutrition or fasting)")
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_are_personalised_when_name_known() {
        let prompt = CoachMode::Training.system_prompt(Some("Alex"));
        assert!(prompt.contains("training mode"));
        assert!(prompt.contains("Alex"));

        let anonymous = CoachMode::Training.system_prompt(Some("   "));
        assert!(!anonymous.contains("name is"));
    }

    #[test]
    fn welcome_text_differs_per_mode() {
        let texts: Vec<String> = CoachMode::ALL.iter().map(|m| m.welcome_text(None)).collect();
        for (i, a) in texts.iter().enumerate() {
            for b in &texts[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(CoachMode::Fasting.welcome_text(Some("Sam")).starts_with("Hi, I'm Sam."));
    }

    #[test]
    fn parses_case_insensitively() {
        assert_eq!("Nutrition".parse::<CoachMode>().unwrap(), CoachMode::Nutrition);
        assert!("yoga".parse::<CoachMode>().is_err());
    }
}
