use chrono::{DateTime, Local};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, info, trace, warn};

use crate::error::SessionError;
use crate::interrupt::InterruptGuard;
use crate::line_source::{LineSource, RawLine};
use crate::presenter::{Level, Presentation, Presenter};
use crate::protocol::{classify, Event, Request, Severity, SourcePosition};

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Forward every raw line read from the server as a debug presentation.
    pub debug: bool,
    /// Upper bound on the wait for a single line; `None` waits forever.
    pub read_timeout: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Sent,
    AwaitingAccept,
    Streaming,
    Settled,
    /// The transport failed; the session cannot be used again.
    Closed,
}

/// Outcome of one command execution.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    /// False if any error-severity diagnostic or problem was reported.
    pub ok: bool,
    pub elapsed: Duration,
    pub completed_at: DateTime<Local>,
}

impl Verdict {
    pub fn summary(&self) -> String {
        format!(
            "Total time: {}, completed {}",
            format_elapsed(self.elapsed),
            self.completed_at.format("%Y-%m-%d %H:%M:%S%.6f")
        )
    }
}

/// Formats a duration as `H:MM:SS.ffffff`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!(
        "{}:{:02}:{:02}.{:06}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        elapsed.subsec_micros()
    )
}

/// Drives commands over one connection to the sbt server, one at a time.
pub struct CommandSession<S> {
    lines: LineSource<BufReader<ReadHalf<S>>>,
    writer: WriteHalf<S>,
    options: SessionOptions,
    state: SessionState,
}

impl CommandSession<TcpStream> {
    /// Opens a connection to the server at `host:port`.
    ///
    /// SIGINT gets its default disposition while the connect is pending and
    /// the previous one is reinstated afterwards.
    pub async fn connect(
        host: &str,
        port: u16,
        connect_timeout: Option<Duration>,
        options: SessionOptions,
    ) -> Result<Self, SessionError> {
        let addr = format!("{}:{}", host, port);
        info!(%addr, "connecting to sbt server");

        let connected = {
            let _guard = InterruptGuard::default_handling();
            let connecting = TcpStream::connect(addr.as_str());
            match connect_timeout {
                Some(limit) => match tokio::time::timeout(limit, connecting).await {
                    Ok(result) => result,
                    Err(_) => Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        format!("connect timed out after {:?}", limit),
                    )),
                },
                None => connecting.await,
            }
        };

        let stream = connected.map_err(|source| SessionError::Connection {
            addr: addr.clone(),
            source,
        })?;
        info!(%addr, "connected to sbt server");
        Ok(Self::new(stream, options))
    }
}

impl<S: AsyncRead + AsyncWrite> CommandSession<S> {
    pub fn new(stream: S, options: SessionOptions) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            lines: LineSource::new(BufReader::new(reader)).with_timeout(options.read_timeout),
            writer,
            options,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Sends `command` and reads the server's events until the command has
    /// left the queue.
    ///
    /// Build errors reported by the server only flip `Verdict::ok`; transport
    /// failures abort the call and close the session. With `silent` nothing
    /// is presented but the verdict is still computed.
    pub async fn execute(
        &mut self,
        command: &str,
        silent: bool,
        presenter: &mut dyn Presenter,
    ) -> Result<Verdict, SessionError> {
        match self.state {
            SessionState::Idle => {}
            SessionState::Closed => return Err(SessionError::ConnectionLost),
            state => return Err(SessionError::ProtocolState { state }),
        }

        let request = Request::exec(command).to_line()?;
        match self.run(command, &request, silent, presenter).await {
            Ok(verdict) => {
                self.state = SessionState::Settled;
                debug!(command, ok = verdict.ok, elapsed = ?verdict.elapsed, "command settled");
                self.state = SessionState::Idle;
                Ok(verdict)
            }
            Err(e) => {
                warn!(command, error = %e, "command aborted, closing session");
                self.state = SessionState::Closed;
                Err(e)
            }
        }
    }

    async fn run(
        &mut self,
        command: &str,
        request: &str,
        silent: bool,
        presenter: &mut dyn Presenter,
    ) -> Result<Verdict, SessionError> {
        self.state = SessionState::Sent;
        self.writer.write_all(request.as_bytes()).await?;
        self.writer.flush().await?;
        debug!(command, "request sent");
        let start = Instant::now();

        self.state = SessionState::AwaitingAccept;
        loop {
            let line = self.lines.read_line().await?;
            self.forward_raw(&line, silent, presenter);
            if let Event::CommandDone { echoed_command } = classify(line.as_str()) {
                if echoed_command == command {
                    break;
                }
            }
        }

        self.state = SessionState::Streaming;
        let mut ok = true;
        loop {
            let line = self.lines.read_line().await?;
            self.forward_raw(&line, silent, presenter);
            let event = classify(line.as_str());
            if event == Event::QueueDrained {
                break;
            }
            if event.severity().is_some_and(Severity::is_error) {
                ok = false;
            }
            if !silent {
                if let Some(presentation) = present_event(&event) {
                    presenter.present(presentation);
                }
            }
        }

        let verdict = Verdict {
            ok,
            elapsed: start.elapsed(),
            completed_at: Local::now(),
        };
        if !silent {
            let level = if verdict.ok { Level::Success } else { Level::Error };
            presenter.present(Presentation::new(level, verdict.summary()));
        }
        Ok(verdict)
    }

    fn forward_raw(&self, line: &RawLine, silent: bool, presenter: &mut dyn Presenter) {
        trace!(state = ?self.state, line = line.as_str(), "received");
        if self.options.debug && !silent {
            presenter.present(Presentation::new(Level::Debug, line.display()));
        }
    }
}

fn severity_level(severity: Severity) -> Level {
    match severity {
        Severity::Info => Level::Info,
        Severity::Warn => Level::Warn,
        Severity::Error => Level::Error,
    }
}

/// Renders a diagnostic or problem; other events have no presentation.
pub fn present_event(event: &Event) -> Option<Presentation> {
    match event {
        Event::Diagnostic { severity, message } => {
            Some(Presentation::new(severity_level(*severity), message.as_str()))
        }
        Event::Problem {
            severity,
            message,
            position,
        } => Some(Presentation::new(
            severity_level(*severity),
            problem_text(message, position),
        )),
        _ => None,
    }
}

fn problem_text(message: &str, position: &SourcePosition) -> String {
    format!(
        "{}\nline: {}\nline content: {}\noffset: {}\npointer: {}\npointer space: \"{}\"\nsource path: {}\nsource file: {}",
        message,
        position.line,
        position.line_content,
        position.offset,
        position.pointer,
        position.pointer_space,
        position.source_path,
        position.source_file
    )
}
