use sbt_bridge::client::{CommandSession, SessionOptions, SessionState};
use sbt_bridge::error::SessionError;
use sbt_bridge::presenter::{Level, Presentation};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

const DONE_COMPILE: &str =
    r#"{"type":"ExecStatusEvent","status":"Done","channelName":"channel-1","execId":"e1","commandQueue":["compile","shell"]}"#;
const DRAINED: &str =
    r#"{"type":"ExecStatusEvent","status":"Done","channelName":"channel-1","execId":"e1","commandQueue":["shell"]}"#;
const INFO_COMPILING: &str = r#"{"type":"StringEvent","level":"info","message":"compiling 1 Scala source","channelName":"channel-1","execId":"e1"}"#;
const PROBLEM_FOO: &str = r#"{"type":"xsbti.Problem","message":{"category":"","severity":"Error","message":"not found: value foo","position":{"line":10,"lineContent":"  foo","offset":42,"pointer":2,"pointerSpace":"  ","sourcePath":"/w/src/main/scala/A.scala","sourceFile":"file:/w/src/main/scala/A.scala"}},"level":"error","channelName":"channel-1","execId":"e1"}"#;

/// Serves one request per script, answering each with its lines, then
/// closes the connection. Resolves to the request lines received.
fn scripted_server(stream: DuplexStream, scripts: Vec<Vec<&'static str>>) -> JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut reader = BufReader::new(reader);
        let mut requests = Vec::new();
        for script in scripts {
            let mut request = String::new();
            reader.read_line(&mut request).await.unwrap();
            requests.push(request);
            for line in script {
                writer.write_all(line.as_bytes()).await.unwrap();
                writer.write_all(b"\n").await.unwrap();
            }
            writer.flush().await.unwrap();
        }
        requests
    })
}

/// Reads the request and then goes quiet without closing.
fn silent_server(stream: DuplexStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut request = String::new();
        reader.read_line(&mut request).await.unwrap();
        std::future::pending::<()>().await;
    })
}

fn session(options: SessionOptions) -> (CommandSession<DuplexStream>, DuplexStream) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    (CommandSession::new(client, options), server)
}

#[tokio::test]
async fn error_problem_fails_verdict_after_all_output() {
    let (mut session, server) = session(SessionOptions::default());
    let server = scripted_server(server, vec![vec![DONE_COMPILE, INFO_COMPILING, PROBLEM_FOO, DRAINED]]);

    let mut out: Vec<Presentation> = Vec::new();
    let verdict = session.execute("compile", false, &mut out).await.unwrap();

    assert!(!verdict.ok);
    assert_eq!(out.len(), 3);
    assert_eq!(out[0], Presentation::new(Level::Info, "compiling 1 Scala source"));
    assert_eq!(out[1].level, Level::Error);
    assert!(out[1].text.contains("not found: value foo"));
    assert!(out[1].text.contains("line: 10"));
    assert!(out[1].text.contains("pointer space: \"  \""));
    assert!(out[1].text.contains("source file: /w/src/main/scala/A.scala"));
    assert_eq!(out[2].level, Level::Error);
    assert!(out[2].text.starts_with("Total time: "));
    assert_eq!(session.state(), SessionState::Idle);

    let requests = server.await.unwrap();
    assert_eq!(requests, vec!["{\"type\":\"ExecCommand\",\"commandLine\":\"compile\"}\n"]);
}

#[tokio::test]
async fn info_only_stream_succeeds() {
    let (mut session, server) = session(SessionOptions::default());
    scripted_server(server, vec![vec![DONE_COMPILE, INFO_COMPILING, INFO_COMPILING, DRAINED]]);

    let mut out: Vec<Presentation> = Vec::new();
    let verdict = session.execute("compile", false, &mut out).await.unwrap();

    assert!(verdict.ok);
    assert_eq!(out.len(), 3);
    assert_eq!(out.last().unwrap().level, Level::Success);
}

#[tokio::test]
async fn warn_problem_is_presented_but_keeps_verdict_ok() {
    let warn_problem = r#"{"type":"xsbti.Problem","message":{"category":"","severity":"Warn","message":"match may not be exhaustive","position":{"line":7,"lineContent":"  x match {","offset":88,"pointer":4,"pointerSpace":"    ","sourcePath":"/w/src/main/scala/B.scala","sourceFile":"file:/w/src/main/scala/B.scala"}},"level":"warn","channelName":"channel-1","execId":"e1"}"#;
    let (mut session, server) = session(SessionOptions::default());
    scripted_server(server, vec![vec![DONE_COMPILE, warn_problem, DRAINED]]);

    let mut out: Vec<Presentation> = Vec::new();
    let verdict = session.execute("compile", false, &mut out).await.unwrap();

    assert!(verdict.ok);
    assert_eq!(out.len(), 2);
    assert_eq!(out[0].level, Level::Warn);
    assert!(out[0].text.starts_with("match may not be exhaustive\nline: 7\n"));
    assert!(out[0].text.contains("pointer space: \"    \""));
    assert_eq!(out[1].level, Level::Success);
}

#[tokio::test]
async fn error_string_event_fails_verdict() {
    let error = r#"{"type":"StringEvent","level":"error","message":"Compilation failed","channelName":"channel-1","execId":"e1"}"#;
    let (mut session, server) = session(SessionOptions::default());
    scripted_server(server, vec![vec![DONE_COMPILE, error, DRAINED]]);

    let mut out: Vec<Presentation> = Vec::new();
    let verdict = session.execute("compile", false, &mut out).await.unwrap();

    assert!(!verdict.ok);
    assert_eq!(out[0], Presentation::new(Level::Error, "Compilation failed"));
}

#[tokio::test]
async fn silent_run_presents_nothing_but_keeps_verdict() {
    let script = vec![DONE_COMPILE, INFO_COMPILING, PROBLEM_FOO, DRAINED];

    let (mut loud, server) = session(SessionOptions::default());
    scripted_server(server, vec![script.clone()]);
    let mut loud_out: Vec<Presentation> = Vec::new();
    let loud_verdict = loud.execute("compile", false, &mut loud_out).await.unwrap();

    let (mut quiet, server) = session(SessionOptions {
        debug: true,
        ..SessionOptions::default()
    });
    scripted_server(server, vec![script]);
    let mut quiet_out: Vec<Presentation> = Vec::new();
    let quiet_verdict = quiet.execute("compile", true, &mut quiet_out).await.unwrap();

    assert!(quiet_out.is_empty());
    assert!(!loud_out.is_empty());
    assert_eq!(quiet_verdict.ok, loud_verdict.ok);
}

#[tokio::test]
async fn lines_before_matching_done_are_ignored() {
    let other_done = r#"{"type":"ExecStatusEvent","status":"Done","commandQueue":["update","shell"]}"#;
    let stale_error = r#"{"type":"StringEvent","level":"error","message":"stale","channelName":"channel-1","execId":"e0"}"#;
    let (mut session, server) = session(SessionOptions::default());
    scripted_server(
        server,
        vec![vec!["[info] welcome", stale_error, other_done, DONE_COMPILE, DRAINED]],
    );

    let mut out: Vec<Presentation> = Vec::new();
    let verdict = session.execute("compile", false, &mut out).await.unwrap();

    assert!(verdict.ok);
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].level, Level::Success);
}

#[tokio::test]
async fn debug_mode_forwards_raw_lines() {
    let noise = r#"{"type":"SettingEvent","value":"\u001b[0m"}"#;
    let (mut session, server) = session(SessionOptions {
        debug: true,
        ..SessionOptions::default()
    });
    scripted_server(server, vec![vec![DONE_COMPILE, noise, DRAINED]]);

    let mut out: Vec<Presentation> = Vec::new();
    session.execute("compile", false, &mut out).await.unwrap();

    let debug: Vec<&str> = out
        .iter()
        .filter(|p| p.level == Level::Debug)
        .map(|p| p.text.as_str())
        .collect();
    assert_eq!(debug.len(), 3);
    assert_eq!(debug[1], "{\"type\":\"SettingEvent\",\"value\":\"\x1b[0m\"}");
}

#[tokio::test]
async fn session_is_reusable_across_commands() {
    let done_test = r#"{"type":"ExecStatusEvent","status":"Done","commandQueue":["test","shell"]}"#;
    let (mut session, server) = session(SessionOptions::default());
    let server = scripted_server(
        server,
        vec![
            vec![DONE_COMPILE, PROBLEM_FOO, DRAINED],
            vec![done_test, INFO_COMPILING, DRAINED],
        ],
    );

    let mut out: Vec<Presentation> = Vec::new();
    assert!(!session.execute("compile", false, &mut out).await.unwrap().ok);
    assert!(session.execute("test", false, &mut out).await.unwrap().ok);
    assert_eq!(server.await.unwrap().len(), 2);
}

#[tokio::test]
async fn quoted_command_is_escaped_and_matched_structurally() {
    let done = r#"{"type":"ExecStatusEvent","status":"Done","commandQueue":["set name := \"demo\"","shell"]}"#;
    let (mut session, server) = session(SessionOptions::default());
    let server = scripted_server(server, vec![vec![done, DRAINED]]);

    let mut out: Vec<Presentation> = Vec::new();
    let verdict = session
        .execute(r#"set name := "demo""#, false, &mut out)
        .await
        .unwrap();

    assert!(verdict.ok);
    let requests = server.await.unwrap();
    assert_eq!(
        requests[0],
        "{\"type\":\"ExecCommand\",\"commandLine\":\"set name := \\\"demo\\\"\"}\n"
    );
}

#[tokio::test]
async fn close_mid_stream_is_connection_lost() {
    let (mut session, server) = session(SessionOptions::default());
    scripted_server(server, vec![vec![DONE_COMPILE, INFO_COMPILING]]);

    let mut out: Vec<Presentation> = Vec::new();
    let result = session.execute("compile", false, &mut out).await;

    assert!(matches!(result, Err(SessionError::ConnectionLost)));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(out.iter().all(|p| p.level != Level::Success && p.level != Level::Error));
    assert!(matches!(
        session.execute("compile", false, &mut out).await,
        Err(SessionError::ConnectionLost)
    ));
}

#[tokio::test]
async fn close_before_done_is_connection_lost() {
    let (mut session, server) = session(SessionOptions::default());
    scripted_server(server, vec![vec![INFO_COMPILING]]);

    let mut out: Vec<Presentation> = Vec::new();
    let result = session.execute("compile", false, &mut out).await;
    assert!(matches!(result, Err(SessionError::ConnectionLost)));
}

#[tokio::test]
async fn abandoned_execution_blocks_the_next_one() {
    let (mut session, server) = session(SessionOptions::default());
    let _server = silent_server(server);

    let mut out: Vec<Presentation> = Vec::new();
    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), session.execute("compile", false, &mut out)).await;
    assert!(abandoned.is_err());
    assert_eq!(session.state(), SessionState::AwaitingAccept);

    let result = session.execute("compile", false, &mut out).await;
    assert!(matches!(
        result,
        Err(SessionError::ProtocolState {
            state: SessionState::AwaitingAccept
        })
    ));
}

#[tokio::test]
async fn read_timeout_is_reported_distinctly() {
    let (mut session, server) = session(SessionOptions {
        debug: false,
        read_timeout: Some(Duration::from_millis(50)),
    });
    let _server = silent_server(server);

    let mut out: Vec<Presentation> = Vec::new();
    let result = session.execute("compile", false, &mut out).await;

    assert!(matches!(result, Err(SessionError::ReadTimeout { .. })));
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn peer_reset_is_connection_lost() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket
            .write_all(format!("{}\n", DONE_COMPILE).as_bytes())
            .await
            .unwrap();
        // Zero linger turns the close into a reset.
        socket.set_linger(Some(Duration::ZERO)).unwrap();
        drop(socket);
    });

    let mut session = CommandSession::connect(
        "127.0.0.1",
        port,
        Some(Duration::from_secs(2)),
        SessionOptions::default(),
    )
    .await
    .unwrap();
    server.await.unwrap();

    let mut out: Vec<Presentation> = Vec::new();
    let result = session.execute("compile", false, &mut out).await;

    assert!(matches!(result, Err(SessionError::ConnectionLost)), "{result:?}");
    assert_eq!(session.state(), SessionState::Closed);
}
