//! tmux command surface.
//!
//! Builds the argument vectors run inside a container and parses what tmux
//! prints back. Nothing here talks to the engine.

use chrono::{DateTime, TimeZone, Utc};

/// A tmux session observed inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSession {
    pub name: String,
    pub created: Option<DateTime<Utc>>,
}

const LIST_FORMAT: &str = "#{session_name}|#{session_created}";

pub fn new_session(name: &str, startup_command: Option<&str>) -> Vec<String> {
    let mut args = vec![
        "tmux".to_string(),
        "new-session".to_string(),
        "-d".to_string(),
        "-s".to_string(),
        name.to_string(),
    ];
    if let Some(command) = startup_command.filter(|c| !c.trim().is_empty()) {
        args.push(command.to_string());
    }
    args
}

pub fn kill_session(name: &str) -> Vec<String> {
    vec![
        "tmux".to_string(),
        "kill-session".to_string(),
        "-t".to_string(),
        name.to_string(),
    ]
}

pub fn list_sessions() -> Vec<String> {
    vec![
        "tmux".to_string(),
        "list-sessions".to_string(),
        "-F".to_string(),
        LIST_FORMAT.to_string(),
    ]
}

/// Command attaching a terminal to an existing session.
pub fn attach_session(name: &str) -> Vec<String> {
    vec![
        "tmux".to_string(),
        "attach-session".to_string(),
        "-t".to_string(),
        name.to_string(),
    ]
}

/// Whether tmux stderr means there is simply no server, i.e. no sessions.
pub fn is_no_server(stderr: &str) -> bool {
    stderr.contains("no server running") || stderr.contains("error connecting")
}

/// Parse `list-sessions` output in `name|created` format.
pub fn parse_session_list(stdout: &str) -> Vec<LiveSession> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter_map(|line| {
            let (name, created) = match line.rsplit_once('|') {
                Some((name, created)) => (name, Some(created)),
                None => (line, None),
            };
            if name.is_empty() {
                return None;
            }
            let created = created
                .and_then(|c| c.trim().parse::<i64>().ok())
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single());
            Some(LiveSession {
                name: name.to_string(),
                created,
            })
        })
        .collect()
}

/// Borrow an owned argument vector as the `&[&str]` the engine expects.
pub fn as_args(args: &[String]) -> Vec<&str> {
    args.iter().map(String::as_str).collect()
}
