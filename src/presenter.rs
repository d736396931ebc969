use std::io::Write;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Success,
    Warn,
    Error,
    Info,
    Help,
    Debug,
}

impl Level {
    /// Bracketed tag printed before the text, colored for the leveled states.
    pub fn header(self, color: bool) -> &'static str {
        match (self, color) {
            (Level::Success, true) => "[\x1b[32;1msuccess\x1b[0m] ",
            (Level::Success, false) => "[success] ",
            (Level::Warn, true) => "[\x1b[33;1mwarn\x1b[0m] ",
            (Level::Warn, false) => "[warn] ",
            (Level::Error, true) => "[\x1b[31;1merror\x1b[0m] ",
            (Level::Error, false) => "[error] ",
            (Level::Info, _) => "[info] ",
            (Level::Help, _) => "[help] ",
            (Level::Debug, _) => "[debug] ",
        }
    }
}

/// A leveled unit of output for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presentation {
    pub level: Level,
    pub text: String,
}

impl Presentation {
    pub fn new(level: Level, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
        }
    }

    pub fn render(&self, color: bool) -> String {
        format!("{}{}", self.level.header(color), self.text)
    }
}

/// Receives presentations in the order they are generated.
pub trait Presenter {
    fn present(&mut self, presentation: Presentation);
}

impl Presenter for Vec<Presentation> {
    fn present(&mut self, presentation: Presentation) {
        self.push(presentation);
    }
}

/// Writes presentations to stdout, one rendered block per presentation.
pub struct StdoutPresenter {
    color: bool,
}

impl StdoutPresenter {
    pub fn new(color: bool) -> Self {
        Self { color }
    }
}

impl Presenter for StdoutPresenter {
    fn present(&mut self, presentation: Presentation) {
        let mut out = std::io::stdout().lock();
        if let Err(e) = writeln!(out, "{}", presentation.render(self.color)) {
            tracing::warn!(error = %e, "failed to write presentation to stdout");
        }
    }
}
