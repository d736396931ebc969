use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Suffix of the record that signals the command queue has drained back to
/// the interactive shell entry.
pub const QUEUE_DRAINED_SUFFIX: &str = r#""commandQueue":["shell"]}"#;

/// Queue entry the server keeps for its own interactive shell.
const SHELL_ENTRY: &str = "shell";

const ESCAPE_MARKER: &str = r"\u001b";

/// Request from client to server
#[derive(Debug, Serialize)]
#[serde(tag = "type")]
pub enum Request {
    /// Execute a command on the server's command queue
    ExecCommand {
        #[serde(rename = "commandLine")]
        command_line: String,
    },
}

impl Request {
    pub fn exec(command: impl Into<String>) -> Self {
        Request::ExecCommand {
            command_line: command.into(),
        }
    }

    /// Renders the request as a single newline-terminated wire line.
    ///
    /// Quotes and control characters in the command are escaped by the JSON
    /// encoder, so a command can never break out of its string field.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

/// Trims user input and collapses every run of CR/LF characters into a
/// single newline.
pub fn normalize_command(code: &str) -> String {
    let mut out = String::with_capacity(code.len());
    let mut in_break = false;
    for c in code.trim().chars() {
        if c == '\r' || c == '\n' {
            if !in_break {
                out.push('\n');
                in_break = true;
            }
        } else {
            out.push(c);
            in_break = false;
        }
    }
    out
}

/// Replaces textual `\u001b` markers with the real escape character.
pub fn normalize_escapes(text: &str) -> Cow<'_, str> {
    if text.contains(ESCAPE_MARKER) {
        Cow::Owned(text.replace(ESCAPE_MARKER, "\x1b"))
    } else {
        Cow::Borrowed(text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn is_error(self) -> bool {
        self == Severity::Error
    }

    fn from_level(level: &str) -> Option<Self> {
        match level {
            "info" => Some(Severity::Info),
            "warn" => Some(Severity::Warn),
            "error" => Some(Severity::Error),
            _ => None,
        }
    }

    fn from_problem(severity: &str) -> Option<Self> {
        match severity {
            "Warn" => Some(Severity::Warn),
            "Error" => Some(Severity::Error),
            _ => None,
        }
    }
}

/// Source location attached to a compiler problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePosition {
    pub line: u64,
    pub line_content: String,
    pub offset: u64,
    pub pointer: u64,
    /// Run of spaces whose length is the column of the pointer.
    pub pointer_space: String,
    pub source_path: String,
    /// Path of the source file with its `file:` scheme removed.
    pub source_file: String,
}

/// One classified record of the server's event stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// Free-text leveled log line.
    Diagnostic { severity: Severity, message: String },
    /// Compiler diagnostic anchored to a source position.
    Problem {
        severity: Severity,
        message: String,
        position: SourcePosition,
    },
    /// The server assigned a channel to this connection.
    ChannelAccepted { channel_name: String },
    /// The server started processing a command.
    CommandAccepted { echoed_command: String },
    /// The server reported a command as done.
    CommandDone { echoed_command: String },
    /// The command queue is back to the shell entry only.
    QueueDrained,
    Unclassified,
}

impl Event {
    pub fn severity(&self) -> Option<Severity> {
        match self {
            Event::Diagnostic { severity, .. } | Event::Problem { severity, .. } => Some(*severity),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum Record {
    #[serde(rename = "xsbti.Problem")]
    Problem { message: ProblemBody },
    StringEvent { level: String, message: String },
    ExecStatusEvent {
        status: String,
        #[serde(rename = "commandQueue", default)]
        command_queue: Vec<String>,
    },
    ChannelAcceptedEvent {
        #[serde(rename = "channelName")]
        channel_name: String,
    },
}

#[derive(Debug, Deserialize)]
struct ProblemBody {
    severity: String,
    message: String,
    position: WirePosition,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePosition {
    line: u64,
    line_content: String,
    offset: u64,
    pointer: u64,
    pointer_space: String,
    source_path: String,
    source_file: String,
}

/// Classifies a single wire line. Never fails: anything that is not one of
/// the known record shapes is `Event::Unclassified`.
pub fn classify(line: &str) -> Event {
    match serde_json::from_str::<Record>(line) {
        Ok(record) => from_record(record),
        Err(_) if line.ends_with(QUEUE_DRAINED_SUFFIX) => Event::QueueDrained,
        Err(_) => Event::Unclassified,
    }
}

fn from_record(record: Record) -> Event {
    match record {
        Record::Problem { message } => from_problem(message).unwrap_or(Event::Unclassified),
        Record::StringEvent { level, message } => match Severity::from_level(&level) {
            Some(severity) => Event::Diagnostic { severity, message },
            None => Event::Unclassified,
        },
        Record::ExecStatusEvent {
            status,
            command_queue,
        } => from_exec_status(&status, command_queue),
        Record::ChannelAcceptedEvent { channel_name } => Event::ChannelAccepted { channel_name },
    }
}

fn from_problem(body: ProblemBody) -> Option<Event> {
    let severity = Severity::from_problem(&body.severity)?;
    let pos = body.position;
    if !pos.pointer_space.chars().all(|c| c == ' ') {
        return None;
    }
    let source_file = match pos.source_file.strip_prefix("file:") {
        Some(path) => path.to_string(),
        None => pos.source_file,
    };
    Some(Event::Problem {
        severity,
        message: body.message,
        position: SourcePosition {
            line: pos.line,
            line_content: pos.line_content,
            offset: pos.offset,
            pointer: pos.pointer,
            pointer_space: pos.pointer_space,
            source_path: pos.source_path,
            source_file,
        },
    })
}

fn from_exec_status(status: &str, mut queue: Vec<String>) -> Event {
    if queue.len() == 1 && queue[0] == SHELL_ENTRY {
        return Event::QueueDrained;
    }
    if queue.len() != 2 || queue[1] != SHELL_ENTRY {
        return Event::Unclassified;
    }
    let echoed_command = queue.swap_remove(0);
    match status {
        "Done" => Event::CommandDone { echoed_command },
        "Processing" => Event::CommandAccepted { echoed_command },
        _ => Event::Unclassified,
    }
}
