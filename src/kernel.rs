use tokio::net::TcpStream;
use tracing::{info, warn};

use crate::client::CommandSession;
use crate::config::{Config, DEFAULT_HOST, DEFAULT_PORT};
use crate::error::SessionError;
use crate::presenter::{Level, Presentation, Presenter};
use crate::protocol::normalize_command;

/// Prefix of the administrative commands handled locally.
pub const ADMIN_PREFIX: &str = "sbt-server";

const ILLEGAL_ARGUMENT: &str = "illegal argument exception";

/// Reply handed back to the notebook host for one execute request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteReply {
    Ok,
    Error { ename: String, evalue: String },
}

impl ExecuteReply {
    fn error(ename: &str, evalue: impl Into<String>) -> Self {
        ExecuteReply::Error {
            ename: ename.to_string(),
            evalue: evalue.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ExecuteReply::Ok)
    }
}

/// Entry point for notebook cells: routes `sbt-server` commands to
/// connection management and everything else to the server.
pub struct Kernel {
    config: Config,
    session: Option<CommandSession<TcpStream>>,
}

impl Kernel {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            session: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub async fn do_execute(
        &mut self,
        code: &str,
        silent: bool,
        presenter: &mut dyn Presenter,
    ) -> ExecuteReply {
        let command = normalize_command(code);
        if command.is_empty() {
            return ExecuteReply::Ok;
        }
        if command.starts_with(ADMIN_PREFIX) {
            return self.admin(&command, silent, presenter).await;
        }

        let Some(session) = self.session.as_mut() else {
            return ExecuteReply::error(
                "not connected",
                format!("no sbt server connection; run \"{}\" first", ADMIN_PREFIX),
            );
        };

        match session.execute(&command, silent, presenter).await {
            Ok(_) => ExecuteReply::Ok,
            Err(e) => {
                let ename = match &e {
                    SessionError::ConnectionLost
                    | SessionError::ReadTimeout { .. }
                    | SessionError::Io(_) => {
                        warn!(error = %e, "dropping sbt server connection");
                        self.session = None;
                        "connection lost"
                    }
                    SessionError::ProtocolState { .. } => "protocol state error",
                    SessionError::Connection { .. } => "connection error",
                    SessionError::Encode(_) => "encoding error",
                };
                ExecuteReply::error(ename, e.to_string())
            }
        }
    }

    async fn admin(
        &mut self,
        command: &str,
        silent: bool,
        presenter: &mut dyn Presenter,
    ) -> ExecuteReply {
        let tokens: Vec<&str> = command.split(' ').collect();
        match tokens.as_slice() {
            [_] => {
                let host = self.config.server.host.clone();
                let port = self.config.server.port;
                self.connect(&host, port).await
            }
            [_, "help"] => {
                if !silent {
                    for text in help_lines() {
                        presenter.present(Presentation::new(Level::Help, text));
                    }
                }
                ExecuteReply::Ok
            }
            [_, host, port] => match port.parse::<u16>() {
                Ok(port) => self.connect(host, port).await,
                Err(_) => ExecuteReply::error(ILLEGAL_ARGUMENT, format!("invalid port: {}", port)),
            },
            _ => ExecuteReply::error(
                ILLEGAL_ARGUMENT,
                format!(
                    "{} needs an argument pair of host and port. For example, \"{} {} {}\"",
                    ADMIN_PREFIX, ADMIN_PREFIX, DEFAULT_HOST, DEFAULT_PORT
                ),
            ),
        }
    }

    async fn connect(&mut self, host: &str, port: u16) -> ExecuteReply {
        match CommandSession::connect(
            host,
            port,
            self.config.connect_timeout(),
            self.config.session_options(),
        )
        .await
        {
            Ok(session) => {
                if self.session.replace(session).is_some() {
                    info!(host, port, "replaced previous sbt server connection");
                }
                ExecuteReply::Ok
            }
            Err(e) => ExecuteReply::error("connection error", e.to_string()),
        }
    }
}

fn help_lines() -> [String; 3] {
    [
        format!(
            "{} needs an argument pair of host and port. For example, \"{} localhost 334\"",
            ADMIN_PREFIX, ADMIN_PREFIX
        ),
        format!(
            "When {} has no argument, run \"{} {} {}\" as default",
            ADMIN_PREFIX, ADMIN_PREFIX, DEFAULT_HOST, DEFAULT_PORT
        ),
        format!(
            "You can add a dedicated port as \"serverPort := {}\" in your build.sbt",
            DEFAULT_PORT
        ),
    ]
}
