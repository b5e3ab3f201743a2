//! Agent command line and environment.

use once_cell::sync::OnceCell;

pub const DEFAULT_PORT: u16 = 3000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOptions {
    pub port: u16,
    pub enable_ssl: bool,
    pub auth_token: Option<String>,
    pub allow_terminate: bool,
}

pub fn usage(prog: &str) -> String {
    format!("Usage: {prog} [--port PORT|-p PORT] [--enableSSL]\n\
             Environment: REMTASK_AGENT_TOKEN, REMTASK_ENABLE_SSL=1, REMTASK_AGENT_ALLOW_TERMINATE=0, REMTASK_AGENT_LOG")
}

/// `Err` carries the usage text for `--help`.
pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<AgentOptions, String> {
    let args: Vec<String> = args.into_iter().collect();
    let prog = args.first().map(String::as_str).unwrap_or("remtask_agent");
    if args.iter().skip(1).any(|a| a == "-h" || a == "--help") {
        return Err(usage(prog));
    }
    let enable_ssl = args.iter().skip(1).any(|a| a == "--enableSSL") || env_flag("REMTASK_ENABLE_SSL");
    Ok(AgentOptions {
        port: parse_port(args.iter().cloned(), DEFAULT_PORT),
        enable_ssl,
        auth_token: std::env::var("REMTASK_AGENT_TOKEN")
            .ok()
            .filter(|t| !t.is_empty()),
        allow_terminate: terminate_enabled(),
    })
}

pub fn parse_port<I: IntoIterator<Item = String>>(args: I, default_port: u16) -> u16 {
    let mut it = args.into_iter();
    let _ = it.next();
    let mut long: Option<String> = None;
    let mut short: Option<String> = None;
    while let Some(a) = it.next() {
        match a.as_str() {
            "--port" => long = it.next(),
            "-p" => short = it.next(),
            _ if a.starts_with("--port=") => {
                if let Some((_, v)) = a.split_once('=') {
                    long = Some(v.to_string());
                }
            }
            _ => {}
        }
    }
    long.or(short)
        .and_then(|s| s.parse::<u16>().ok())
        .unwrap_or(default_port)
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

// Read once.
pub fn terminate_enabled() -> bool {
    static ON: OnceCell<bool> = OnceCell::new();
    *ON.get_or_init(|| {
        std::env::var("REMTASK_AGENT_ALLOW_TERMINATE")
            .map(|v| v != "0")
            .unwrap_or(true)
    })
}
