use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tmail::attachments::FsAttachmentWriter;
use tmail::compose::{self, Draft};
use tmail::config::{self, AccountConfig, Config};
use tmail::connection::ConnectionManager;
use tmail::credentials::{self, CredentialSource, KeyringStore};
use tmail::engine::{Display, Engine, EngineSettings};
use tmail::error::MailError;
use tmail::render;
use tmail::router::{self, Intent};
use tmail::store::imap::ImapConnector;
use tmail::submit::SmtpSubmitter;

fn default_config_path() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg).join("tmail").join("config.toml")
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home)
            .join(".config")
            .join("tmail")
            .join("config.toml")
    } else {
        PathBuf::from("config.toml")
    }
}

fn show_log() {
    let path = tmail::log::log_path();
    if !path.exists() {
        eprintln!("No log file found at {}", path.display());
        std::process::exit(1);
    }
    let pager = std::env::var("PAGER").unwrap_or_else(|_| "less".to_string());
    let status = Command::new(&pager).arg(&path).status();
    match status {
        Ok(s) if s.success() => {}
        Ok(s) => std::process::exit(s.code().unwrap_or(1)),
        Err(e) => {
            eprintln!("Failed to launch pager '{}': {}", pager, e);
            std::process::exit(1);
        }
    }
}

fn print_help_config() {
    let config_path = default_config_path();
    println!("Default config file: {}", config_path.display());
    println!();
    println!("Available options:");
    println!();
    println!("default_account = \"NAME\"        # Account used when --account is not given");
    println!();
    println!("[ui]");
    println!(
        "  editor = \"nvim\"              # Editor for composing (fallback: $EDITOR, then vi)"
    );
    println!("  page_size = 20               # Emails per page (default: 20)");
    println!("  request_timeout_secs = 30    # Give up on a server request after this long (default: 30)");
    println!("  download_dir = \"~/Downloads\" # Where /save writes attachments (default: ~/Downloads)");
    println!();
    println!("[mail]");
    println!("  archive_folder = \"Archive\"   # Target folder for /archive (default: first of [Gmail]/All Mail, Archive, Archives)");
    println!();
    println!("[account.NAME]");
    println!("  email = \"you@example.com\"          # Address, also the login name (required)");
    println!("  imap_host = \"imap.example.com\"     # IMAP server (required)");
    println!("  imap_port = 993                    # (default: 993)");
    println!("  smtp_host = \"smtp.example.com\"     # (default: imap_host with imap -> smtp)");
    println!("  smtp_port = 587                    # 465 = implicit TLS, otherwise STARTTLS (default: 587)");
    println!("  use_tls = true                     # (default: true)");
    println!("  display_name = \"You\"               # Name on outgoing mail (default: local part of email)");
    println!("  password_command = \"pass show mail\" # Shell command printing the password (optional)");
    println!();
    println!("Without password_command the password is read from the system keyring,");
    println!("then asked for on the terminal.");
}

fn prompt_line(label: &str) -> Option<String> {
    eprint!("{}", label);
    io::stderr().flush().ok();
    let mut line = String::new();
    match io::stdin().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim().to_string()),
    }
}

/// Interactive first-run setup. Returns `None` when the user declines.
fn run_setup(config_path: &Path) -> Option<()> {
    eprintln!("No account is configured. Let's set one up.");
    let email = prompt_line("Email address: ").filter(|e| e.contains('@'))?;
    let domain = email.split('@').nth(1).unwrap_or("mail");
    let name = domain.split('.').next().unwrap_or("mail").to_string();

    let mut account = match config::guess_provider(&email) {
        Some(p) => {
            eprintln!("Using {}:{} for {}", p.imap_host, p.imap_port, domain);
            let mut account = AccountConfig::new(&name, &email, p.imap_host);
            account.imap_port = p.imap_port;
            account.smtp_host = p.smtp_host.to_string();
            account.smtp_port = p.smtp_port;
            account.use_tls = p.use_tls;
            account
        }
        None => {
            let host = prompt_line("IMAP server: ").filter(|h| !h.is_empty())?;
            AccountConfig::new(&name, &email, &host)
        }
    };
    let command = prompt_line("Password command (empty to use the keyring): ")?;
    if !command.is_empty() {
        account.password_command = Some(command);
    }

    match config::save_account(config_path, &account) {
        Ok(()) => {
            eprintln!("Wrote {}", config_path.display());
            Some(())
        }
        Err(e) => {
            eprintln!("Failed to write {}: {}", config_path.display(), e);
            None
        }
    }
}

fn load_config(config_path: &Path) -> Config {
    if !config_path.exists() && run_setup(config_path).is_none() {
        eprintln!("No account configured.");
        std::process::exit(1);
    }
    let config = match Config::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config from {}: {}", config_path.display(), e);
            std::process::exit(1);
        }
    };
    if !config.accounts.is_empty() {
        return config;
    }
    if run_setup(config_path).is_none() {
        eprintln!("No account configured.");
        std::process::exit(1);
    }
    match Config::load(config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading config from {}: {}", config_path.display(), e);
            std::process::exit(1);
        }
    }
}

fn editor_command(config: &Config) -> String {
    config
        .ui
        .editor
        .clone()
        .or_else(|| std::env::var("EDITOR").ok())
        .unwrap_or_else(|| "vi".to_string())
}

/// Open the draft in the editor and ask whether to send it. The temp file
/// is kept when sending is chosen so a failed send can be recovered.
fn edit_draft(draft: &Draft, editor_cmd: &str) -> Result<Option<(String, PathBuf)>, String> {
    let path = compose::write_temp_file(&draft.render())
        .map_err(|e| format!("failed to create temp file: {}", e))?;
    let status = Command::new("sh")
        .arg("-c")
        .arg(format!("{} {}", editor_cmd, path.display()))
        .status();
    match status {
        Ok(s) if s.success() => {}
        Ok(s) => {
            let _ = std::fs::remove_file(&path);
            return Err(format!("editor exited with {}", s));
        }
        Err(e) => {
            let _ = std::fs::remove_file(&path);
            return Err(format!("failed to launch editor '{}': {}", editor_cmd, e));
        }
    }

    let text = std::fs::read_to_string(&path).map_err(|e| format!("failed to read draft: {}", e))?;
    if router::parse_answer(prompt_line("Send? [y/N] ").as_deref(), false) {
        Ok(Some((text, path)))
    } else {
        let _ = std::fs::remove_file(&path);
        Ok(None)
    }
}

/// In JSON mode the line after a compose payload carries the edited draft
/// as `{"send": "..."}`; anything else discards it.
fn read_json_draft() -> Option<String> {
    let line = read_line()?;
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    value.get("send")?.as_str().map(str::to_string)
}

fn read_line() -> Option<String> {
    let mut line = String::new();
    match io::stdin().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line),
    }
}

/// Ask before `intent` runs when the engine wants a confirmation. In JSON
/// mode the question is emitted and the next line holds the answer.
fn confirmed(engine: &mut Engine, intent: &Intent, json: bool) -> Result<bool, MailError> {
    let Some(question) = engine.confirmation(intent)? else {
        return Ok(true);
    };
    if json {
        emit(&Ok(question), true);
        return Ok(router::parse_json_answer(read_line().as_deref()));
    }
    let default = matches!(question, Display::Confirm { default: true, .. });
    let answer = prompt_line(&format!("{} ", render::render_text(&question)));
    Ok(router::parse_answer(answer.as_deref(), default))
}

/// Remove everything stored for an account that logged out.
fn forget_account(config_path: &Path, account: &AccountConfig) {
    if let Err(e) = KeyringStore.delete_password(account) {
        log::warn!("could not remove stored password: {}", e);
        eprintln!("Could not remove stored password: {}", e);
    }
    if let Err(e) = config::remove_account(config_path, &account.name) {
        log::warn!("could not update {}: {}", config_path.display(), e);
        eprintln!("Could not update {}: {}", config_path.display(), e);
    }
}

fn emit(result: &Result<Display, MailError>, json: bool) {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if json {
        let value = match result {
            Ok(d) => render::ok_response(d),
            Err(e) => render::err_response(e),
        };
        let _ = serde_json::to_writer(&mut out, &value);
        let _ = out.write_all(b"\n");
    } else {
        let text = match result {
            Ok(d) => render::render_text(d),
            Err(e) => render::render_error(e),
        };
        if !text.is_empty() {
            let _ = writeln!(out, "{}", text);
        }
    }
    let _ = out.flush();
}

fn compose_exchange(engine: &mut Engine, draft: &Draft, editor_cmd: &str, json: bool) {
    if json {
        emit(
            &Ok(Display::Compose {
                draft: draft.clone(),
            }),
            true,
        );
        let edited = read_json_draft();
        emit(&engine.finish_compose(edited.as_deref()), true);
        return;
    }

    match edit_draft(draft, editor_cmd) {
        Ok(Some((text, path))) => {
            let result = engine.finish_compose(Some(&text));
            if result.is_ok() {
                let _ = std::fs::remove_file(&path);
            } else {
                eprintln!("Draft kept at {}", path.display());
            }
            emit(&result, false);
        }
        Ok(None) => emit(&engine.finish_compose(None), false),
        Err(e) => {
            log::error!("{}", e);
            let _ = engine.finish_compose(None);
            emit(&Err(MailError::State(e)), false);
        }
    }
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        eprintln!("Usage: tmail [OPTIONS]");
        eprintln!();
        eprintln!("Options:");
        eprintln!("  --config=PATH    Use config file at PATH instead of default");
        eprintln!("  --account=NAME   Use the named account instead of the default");
        eprintln!("  --json           Print one JSON object per command instead of text");
        eprintln!("  --clear-log      Truncate the log file at startup");
        eprintln!("  --log            View the log file in $PAGER");
        eprintln!("  --help-config    Print default config path and all options");
        eprintln!("  --help           Show this help");
        std::process::exit(0);
    }

    if args.iter().any(|a| a == "--clear-log") {
        if let Err(e) = tmail::log::clear() {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }

    if args.iter().any(|a| a == "--log") {
        show_log();
        std::process::exit(0);
    }

    if args.iter().any(|a| a == "--help-config") {
        print_help_config();
        std::process::exit(0);
    }

    tmail::log::init();

    let config_path = args
        .iter()
        .find(|a| a.starts_with("--config="))
        .map(|a| PathBuf::from(&a["--config=".len()..]))
        .unwrap_or_else(default_config_path);
    let account_name = args
        .iter()
        .find(|a| a.starts_with("--account="))
        .map(|a| a["--account=".len()..].to_string());
    let json = args.iter().any(|a| a == "--json");

    let config = load_config(&config_path);
    let account = match config.account(account_name.as_deref()) {
        Some(a) => a.clone(),
        None => {
            eprintln!(
                "No account named '{}' in {}",
                account_name.unwrap_or_default(),
                config_path.display()
            );
            std::process::exit(1);
        }
    };

    let (password, source) = match credentials::resolve_password(&account) {
        Some(found) => found,
        None => {
            eprintln!("No password available for {}", account.email);
            std::process::exit(1);
        }
    };

    let interrupt = Arc::new(AtomicBool::new(false));
    {
        let interrupt = interrupt.clone();
        if let Err(e) = ctrlc::set_handler(move || interrupt.store(true, Ordering::SeqCst)) {
            log::warn!("failed to install interrupt handler: {}", e);
        }
    }

    let timeout = Duration::from_secs(config.ui.request_timeout_secs);
    let conn = ConnectionManager::new(
        account.clone(),
        Arc::new(ImapConnector::new(timeout)),
        password.clone(),
        timeout,
        interrupt,
    );
    let mut engine = Engine::new(
        EngineSettings::from_config(&config),
        Some(conn),
        Box::new(SmtpSubmitter::new(account.clone(), password.clone())),
        Box::new(FsAttachmentWriter),
    );

    if !json {
        eprint!("Connecting to {} ({})...", account.name, account.imap_host);
        io::stderr().flush().ok();
    }
    let first = engine.start();
    if let Err(ref e) = first {
        if !json {
            eprintln!(" FAILED");
        }
        log::error!("startup failed: {}", e);
        emit(&first, json);
        std::process::exit(1);
    }
    if !json {
        eprintln!(" OK");
    }
    if source == CredentialSource::Prompt {
        if let Err(e) = KeyringStore.set_password(&account, &password) {
            log::warn!("could not store password: {}", e);
        }
    }
    emit(&first, json);

    let editor_cmd = editor_command(&config);
    loop {
        if !json {
            print!("tmail> ");
            io::stdout().flush().ok();
        }
        let mut line = String::new();
        match io::stdin().read_line(&mut line) {
            Ok(0) => {
                engine.handle(Intent::Quit).ok();
                break;
            }
            Ok(_) => {}
            Err(e) => {
                log::error!("failed to read input: {}", e);
                engine.handle(Intent::Quit).ok();
                break;
            }
        }

        let intent = router::parse(&line);
        match confirmed(&mut engine, &intent, json) {
            Ok(true) => {}
            Ok(false) => {
                emit(
                    &Ok(Display::Notice {
                        text: "Cancelled".to_string(),
                    }),
                    json,
                );
                continue;
            }
            Err(e) => {
                emit(&Err(e), json);
                continue;
            }
        }

        let result = engine.handle(intent);
        match result {
            Ok(Display::Compose { ref draft }) => {
                compose_exchange(&mut engine, draft, &editor_cmd, json)
            }
            Ok(Display::Quit) => {
                emit(&result, json);
                break;
            }
            Ok(Display::LoggedOut { ref account }) => {
                forget_account(&config_path, account);
                emit(&result, json);
                break;
            }
            _ => emit(&result, json),
        }

        if engine.session_failed() {
            log::error!("session failed; exiting");
            std::process::exit(1);
        }
    }

    if engine.session_failed() {
        std::process::exit(1);
    }
}
