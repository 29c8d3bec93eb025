//! Slash commands understood by the bot.

use teloxide::utils::command::BotCommands;

use crate::assistant::query::HelpMode;

#[derive(BotCommands, Clone, Debug, PartialEq)]
#[command(rename_rule = "snake_case")]
pub enum Command {
    #[command(description = "Configure the preferred language")]
    Start,
    #[command(description = "Provide 3-4 examples of a word or a phrase")]
    Examples,
    #[command(description = "Provide translation of a phrase or a word")]
    Translation,
    #[command(description = "Give inflection of a given word")]
    Inflection,
    #[command(description = "Pronounce a word or a phrase")]
    Pronunciation,
    #[command(description = "Set speech speed")]
    SpeechSpeed,
    #[command(description = "Check service health status")]
    Healthz,
}

impl Command {
    /// The help mode this command switches to, if it is a mode command.
    pub fn help_mode(&self) -> Option<HelpMode> {
        match self {
            Command::Examples => Some(HelpMode::Examples),
            Command::Translation => Some(HelpMode::Translation),
            Command::Inflection => Some(HelpMode::Inflection),
            _ => None,
        }
    }
}
