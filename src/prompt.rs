use serde::{Deserialize, Serialize};

/// Joins the character and main prompts into the text sent to the service.
///
/// Both parts are trimmed; the character prompt always comes first. An empty
/// result means there is nothing to generate.
pub fn combine(main: &str, character: &str) -> String {
    let main = main.trim();
    let character = character.trim();
    match (character.is_empty(), main.is_empty()) {
        (false, false) => format!("{character}, {main}"),
        (false, true) => character.to_string(),
        (true, false) => main.to_string(),
        (true, true) => String::new(),
    }
}

/// The three prompt fields of a generation request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptSet {
    #[serde(default)]
    pub main: String,
    #[serde(default, rename = "char")]
    pub character: String,
    #[serde(default, rename = "neg")]
    pub negative: String,
}

impl PromptSet {
    pub fn new(
        main: impl Into<String>,
        character: impl Into<String>,
        negative: impl Into<String>,
    ) -> Self {
        Self {
            main: main.into(),
            character: character.into(),
            negative: negative.into(),
        }
    }

    pub fn combined(&self) -> String {
        combine(&self.main, &self.character)
    }

    /// Plain-text rendering used for copying prompts elsewhere.
    pub fn clipboard_text(&self) -> String {
        format!(
            "PROMPT:\n{}\n\nNEGATIVE:\n{}",
            self.combined(),
            self.negative.trim()
        )
    }
}
