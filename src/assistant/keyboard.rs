//! Inline keyboards and the callback data their buttons carry.
//!
//! Callback data is `<namespace>:<value>` with namespaces `language`,
//! `pronunciation` and `speech_speed`.

/// Languages offered by `/start`, laid out three per row.
pub const LANGUAGES: [&str; 6] = ["Dutch", "French", "German", "Estonian", "Spanish", "Russian"];

/// Buttons per chooser row.
pub const ROW_WIDTH: usize = 3;

/// A labelled inline button.
#[derive(Debug, Clone, PartialEq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, callback: &Callback) -> Self {
        Self {
            label: label.into(),
            data: callback.encode(),
        }
    }
}

/// Rows of buttons, top to bottom.
pub type Keyboard = Vec<Vec<Button>>;

/// Discrete speech speed levels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SpeechSpeed {
    Slow,
    Normal,
    Fast,
}

impl SpeechSpeed {
    pub const ALL: [SpeechSpeed; 3] = [SpeechSpeed::Slow, SpeechSpeed::Normal, SpeechSpeed::Fast];

    pub fn value(&self) -> f64 {
        match self {
            SpeechSpeed::Slow => 0.5,
            SpeechSpeed::Normal => 0.7,
            SpeechSpeed::Fast => 1.0,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SpeechSpeed::Slow => "Slow",
            SpeechSpeed::Normal => "Normal",
            SpeechSpeed::Fast => "Fast",
        }
    }

    /// The level whose one-decimal form is `s`, e.g. `"0.7"` or `"1.0"`.
    pub fn parse(s: &str) -> Option<Self> {
        let value: f64 = s.trim().parse().ok()?;
        Self::ALL
            .into_iter()
            .find(|level| (level.value() - value).abs() < 1e-9)
    }
}

/// Decoded callback data.
#[derive(Debug, Clone, PartialEq)]
pub enum Callback {
    Language(String),
    /// 1-based example index; 0 asks for the chooser.
    Pronunciation(usize),
    SpeechSpeed(SpeechSpeed),
}

impl Callback {
    /// Parse callback data. Unknown namespaces and malformed values give `None`.
    pub fn decode(data: &str) -> Option<Self> {
        let (namespace, value) = data.split_once(':')?;
        match namespace {
            "language" if !value.is_empty() => Some(Callback::Language(value.to_string())),
            "pronunciation" if value.bytes().all(|b| b.is_ascii_digit()) => {
                value.parse().ok().map(Callback::Pronunciation)
            }
            "speech_speed" => SpeechSpeed::parse(value).map(Callback::SpeechSpeed),
            _ => None,
        }
    }

    pub fn encode(&self) -> String {
        match self {
            Callback::Language(language) => format!("language:{language}"),
            Callback::Pronunciation(n) => format!("pronunciation:{n}"),
            Callback::SpeechSpeed(speed) => format!("speech_speed:{:.1}", speed.value()),
        }
    }
}

/// Split `buttons` into rows of [`ROW_WIDTH`]; the last row holds the remainder.
pub fn into_rows(buttons: Vec<Button>) -> Keyboard {
    buttons.chunks(ROW_WIDTH).map(<[Button]>::to_vec).collect()
}

/// Numbered chooser for `count` examples, buttons `1..=count`.
pub fn example_chooser(count: usize) -> Keyboard {
    into_rows(
        (1..=count)
            .map(|n| Button::new(n.to_string(), &Callback::Pronunciation(n)))
            .collect(),
    )
}

pub fn language_chooser() -> Keyboard {
    into_rows(
        LANGUAGES
            .iter()
            .map(|language| Button::new(*language, &Callback::Language(language.to_string())))
            .collect(),
    )
}

pub fn speech_speed_chooser() -> Keyboard {
    vec![
        SpeechSpeed::ALL
            .iter()
            .map(|speed| Button::new(speed.label(), &Callback::SpeechSpeed(*speed)))
            .collect(),
    ]
}
