//! remtask CLI: connect to an agent, print its process table, optionally watch or kill.

use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use remtask::format;
use remtask::profiles::{load_profiles, save_profiles, ProfileEntry, ProfileRequest, ResolveProfile};
use remtask::ws::{target_url, WsOptions, WsTransport, DEFAULT_TIMEOUT};
use remtask::{access, logging};
use remtask::{ConnectionState, Frame, Session, SessionConfig, SessionHandle};

const USAGE: &str = "[--tls-ca CERT_PEM|-t CERT_PEM] [--token TOKEN] [--profile NAME|-P NAME] [--save] \
[--filter TEXT|-f TEXT] [--watch|-w] [--kill PID|-k PID] [--yes|-y] [--interval SECS] [--timeout SECS] \
[--dry-run] [ws://HOST:PORT/ws | HOST | HOST:PORT]";

#[derive(Debug, Default)]
struct ParsedArgs {
    target: Option<String>,
    tls_ca: Option<String>,
    token: Option<String>,
    profile: Option<String>,
    save: bool,
    filter: Option<String>,
    watch: bool,
    kill: Option<u32>,
    yes: bool,
    interval: Option<Duration>,
    timeout: Option<Duration>,
    dry_run: bool,
}

enum ArgsError {
    Help(String),
    Invalid(String),
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, ArgsError> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "remtask".into());
    let usage = || format!("Usage: {prog} {USAGE}");
    let mut parsed = ParsedArgs::default();

    while let Some(arg) = it.next() {
        let (flag, inline) = match arg.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };
        let mut value = |name: &str| -> Result<String, ArgsError> {
            inline
                .clone()
                .or_else(|| it.next())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| ArgsError::Invalid(format!("{name} needs a value\n{}", usage())))
        };
        match flag.as_str() {
            "-h" | "--help" => return Err(ArgsError::Help(usage())),
            "--tls-ca" | "-t" => parsed.tls_ca = Some(value("--tls-ca")?),
            "--token" => parsed.token = Some(value("--token")?),
            "--profile" | "-P" => parsed.profile = Some(value("--profile")?),
            "--filter" | "-f" => parsed.filter = Some(value("--filter")?),
            "--kill" | "-k" => {
                let v = value("--kill")?;
                let pid = v
                    .parse()
                    .map_err(|_| ArgsError::Invalid(format!("invalid pid: {v}")))?;
                parsed.kill = Some(pid);
            }
            "--interval" => parsed.interval = Some(parse_secs("--interval", &value("--interval")?)?),
            "--timeout" => parsed.timeout = Some(parse_secs("--timeout", &value("--timeout")?)?),
            "--save" => parsed.save = true,
            "--watch" | "-w" => parsed.watch = true,
            "--yes" | "-y" => parsed.yes = true,
            "--dry-run" => parsed.dry_run = true,
            _ if arg.starts_with('-') => {
                return Err(ArgsError::Invalid(format!("Unknown flag {arg}. {}", usage())));
            }
            _ if parsed.target.is_none() => parsed.target = Some(arg),
            _ => {
                return Err(ArgsError::Invalid(format!(
                    "Unexpected argument. {}",
                    usage()
                )))
            }
        }
    }
    Ok(parsed)
}

fn parse_secs(flag: &str, v: &str) -> Result<Duration, ArgsError> {
    match v.parse::<u64>() {
        Ok(n) if n > 0 => Ok(Duration::from_secs(n)),
        _ => Err(ArgsError::Invalid(format!(
            "{flag} expects a positive number of seconds, got {v}"
        ))),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    logging::init();

    let parsed = match parse_args(env::args()) {
        Ok(v) => v,
        Err(ArgsError::Help(msg)) => {
            eprintln!("{msg}");
            return Ok(ExitCode::SUCCESS);
        }
        Err(ArgsError::Invalid(msg)) => {
            eprintln!("{msg}");
            return Ok(ExitCode::from(64));
        }
    };

    if let Err(e) = access::check() {
        eprintln!("remtask: {e}");
        return Ok(ExitCode::from(2));
    }

    let Some(entry) = resolve_connection(&parsed)? else {
        return Ok(ExitCode::SUCCESS);
    };

    if parsed.dry_run {
        let url = target_url(&entry.url, None).context("resolving target")?;
        println!("{url}");
        return Ok(ExitCode::SUCCESS);
    }

    let transport = WsTransport::new(WsOptions {
        tls_ca: entry.tls_ca.as_ref().map(PathBuf::from),
        token: entry.token.clone(),
        timeout: parsed.timeout.unwrap_or(DEFAULT_TIMEOUT),
    })
    .context("loading TLS CA certificate")?;
    let transport = Arc::new(transport);
    let mut config = SessionConfig::default();
    if let Some(interval) = parsed.interval {
        config.poll_interval = interval;
    }
    if let Some(limit) = parsed.timeout {
        config.fetch_timeout = limit;
    }
    let session = Session::spawn_shared(Arc::clone(&transport), transport, config);

    if let Some(text) = parsed.filter.as_deref() {
        session.set_filter(text).await;
    }

    let code = run(&session, &entry.url, &parsed).await;
    session.shutdown();
    Ok(code)
}

async fn run(session: &SessionHandle, target: &str, parsed: &ParsedArgs) -> ExitCode {
    if let Err(e) = session.connect(target).await {
        eprintln!("remtask: {e}");
        print_frame(&session.frame());
        return ExitCode::FAILURE;
    }

    if let Some(pid) = parsed.kill {
        return kill(session, pid, parsed.yes).await;
    }

    print_frame(&session.frame());
    if parsed.watch {
        return watch(session).await;
    }
    ExitCode::SUCCESS
}

async fn kill(session: &SessionHandle, pid: u32, yes: bool) -> ExitCode {
    let frame = session.frame();
    let Some(process) = frame.find(pid).cloned() else {
        eprintln!("remtask: process {pid} is not in the current view");
        return ExitCode::FAILURE;
    };
    if !yes && !prompt_yes_no(&format!("Terminate {} (pid {pid})? [y/N]: ", process.name)) {
        return ExitCode::SUCCESS;
    }
    if let Err(e) = session.terminate(process).await {
        eprintln!("remtask: {e}");
        return ExitCode::FAILURE;
    }
    eprintln!("terminated {pid}");
    if let Err(e) = session.refresh().await {
        eprintln!("remtask: {e}");
    }
    print_frame(&session.frame());
    ExitCode::SUCCESS
}

async fn watch(session: &SessionHandle) -> ExitCode {
    let mut frames = session.frames();
    let mut shown = frames.borrow_and_update().generation;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            changed = frames.changed() => {
                if changed.is_err() {
                    return ExitCode::FAILURE;
                }
                let frame = Arc::clone(&frames.borrow_and_update());
                if let ConnectionState::Failed(reason) = &frame.state {
                    eprintln!("remtask: connection lost: {reason}");
                    print_frame(&frame);
                    return ExitCode::FAILURE;
                }
                if frame.generation.is_some() && frame.generation != shown {
                    shown = frame.generation;
                    print_frame(&frame);
                }
            }
            _ = &mut ctrl_c => return ExitCode::SUCCESS,
        }
    }
}

/// Turn flags and saved profiles into the connection to use. `None` means the
/// user aborted or nothing was given.
fn resolve_connection(parsed: &ParsedArgs) -> anyhow::Result<Option<ProfileEntry>> {
    let profiles_file = load_profiles();
    let req = ProfileRequest {
        profile_name: parsed.profile.clone(),
        url: parsed.target.clone(),
        tls_ca: parsed.tls_ca.clone(),
        token: parsed.token.clone(),
    };
    let mut profiles = profiles_file.clone();
    let entry = match req.resolve(&profiles_file) {
        ResolveProfile::Direct(entry) => {
            if let Some(name) = parsed.profile.as_ref() {
                let write = match profiles.profiles.get(name) {
                    None => true,
                    Some(existing) if *existing == entry => false,
                    Some(_) => {
                        parsed.save
                            || prompt_yes_no(&format!(
                                "Overwrite existing profile '{name}'? [y/N]: "
                            ))
                    }
                };
                if write {
                    profiles.profiles.insert(name.clone(), entry.clone());
                    save_profiles(&profiles).context("saving profiles")?;
                }
            }
            entry
        }
        ResolveProfile::Loaded(entry) => entry,
        ResolveProfile::PromptSelect(names) => {
            eprintln!("Select profile:");
            for (i, n) in names.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, n);
            }
            let line = prompt_string("Enter number (or blank to abort): ")?;
            let picked = line
                .trim()
                .parse::<usize>()
                .ok()
                .and_then(|idx| idx.checked_sub(1))
                .and_then(|idx| names.get(idx))
                .and_then(|name| profiles.profiles.get(name));
            match picked {
                Some(entry) => entry.clone(),
                None => return Ok(None),
            }
        }
        ResolveProfile::PromptCreate(name) => {
            eprintln!("Profile '{name}' does not exist yet.");
            let url = prompt_string("Enter target (HOST, HOST:PORT or ws://HOST:PORT/ws): ")?;
            let url = url.trim();
            if url.is_empty() {
                return Ok(None);
            }
            let ca = prompt_string("Enter TLS CA path (or leave blank): ")?;
            let ca = ca.trim();
            let entry = ProfileEntry {
                url: url.to_string(),
                tls_ca: (!ca.is_empty()).then(|| ca.to_string()),
                token: parsed.token.clone(),
            };
            profiles.profiles.insert(name, entry.clone());
            save_profiles(&profiles).context("saving profiles")?;
            entry
        }
        ResolveProfile::None => {
            eprintln!("No target provided and no profiles to select.");
            return Ok(None);
        }
    };
    Ok(Some(entry))
}

fn print_frame(frame: &Frame) {
    let mut out = io::stdout().lock();
    let _ = render(&mut out, frame).and_then(|_| out.flush());
}

fn render(out: &mut impl Write, frame: &Frame) -> io::Result<()> {
    if let Some(target) = &frame.target {
        write!(out, "{target}  [{}]", frame.state)?;
        if let Some(at) = frame.fetched_at {
            write!(out, "  updated {}", at.format("%H:%M:%S"))?;
        }
        writeln!(out)?;
    }
    writeln!(out, "{}", format::cpu_line(&frame.performance))?;
    writeln!(out, "{}", format::free_mem_line(&frame.performance))?;
    let shown_mem: u64 = frame.visible.iter().map(|p| p.mem_bytes).sum();
    match &frame.filter {
        Some(f) => writeln!(
            out,
            "Filter \"{f}\": {} of {} processes, {}",
            frame.visible.len(),
            frame.total,
            format::human(shown_mem)
        )?,
        None => writeln!(out, "{} processes, {}", frame.total, format::human(shown_mem))?,
    }
    writeln!(
        out,
        "  {:>8}  {:<28} {:>12} {:>7}  PATH",
        "PID", "NAME", "MEM (MB)", "THREADS"
    )?;
    for (name, members) in frame.grouped() {
        writeln!(out, "{} ({})", name, members.len())?;
        for p in members {
            writeln!(
                out,
                "  {:>8}  {:<28} {:>12} {:>7}  {}",
                p.pid,
                format::truncate_middle(&p.name, 28),
                format::mem_mb(p.mem_bytes),
                p.threads,
                p.exe_path.as_deref().unwrap_or("")
            )?;
        }
    }
    Ok(())
}

fn prompt_yes_no(prompt: &str) -> bool {
    match prompt_string(prompt) {
        Ok(line) => matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        Err(_) => false,
    }
}

fn prompt_string(prompt: &str) -> io::Result<String> {
    eprint!("{prompt}");
    let _ = io::stderr().flush();
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("remtask")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn flags_long_short_and_inline() {
        let p = match parse_args(args(&["-f", "chr", "--kill=42", "-y", "--interval", "2", "host"])) {
            Ok(p) => p,
            Err(_) => panic!("parse failed"),
        };
        assert_eq!(p.filter.as_deref(), Some("chr"));
        assert_eq!(p.kill, Some(42));
        assert!(p.yes);
        assert_eq!(p.interval, Some(Duration::from_secs(2)));
        assert_eq!(p.target.as_deref(), Some("host"));
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(matches!(parse_args(args(&["--kill", "abc"])), Err(ArgsError::Invalid(_))));
        assert!(matches!(parse_args(args(&["--timeout", "0"])), Err(ArgsError::Invalid(_))));
        assert!(matches!(parse_args(args(&["a", "b"])), Err(ArgsError::Invalid(_))));
        assert!(matches!(parse_args(args(&["--token"])), Err(ArgsError::Invalid(_))));
        assert!(matches!(parse_args(args(&["-t", "x", "-h"])), Err(ArgsError::Help(_))));
    }
}
