use crate::config::AccountConfig;
use std::io::{self, BufRead, Write};
use std::process::Command;

/// Keyring service name.
const SERVICE: &str = "tmail";

/// Where a password came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Command,
    Keyring,
    Prompt,
}

pub trait CredentialProvider {
    fn get_password(&self, account: &AccountConfig) -> Option<String>;
}

/// Runs the account's `password_command` through `sh -c`.
pub struct PasswordCommand;

impl CredentialProvider for PasswordCommand {
    fn get_password(&self, account: &AccountConfig) -> Option<String> {
        let cmd = account.password_command.as_deref()?;
        match run_password_command(cmd) {
            Ok(pw) => Some(pw),
            Err(e) => {
                log::warn!("{}", e);
                None
            }
        }
    }
}

pub fn run_password_command(cmd: &str) -> Result<String, String> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .output()
        .map_err(|e| format!("failed to execute password command: {}", e))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!(
            "password command exited with {}: {}",
            output.status, stderr
        ));
    }

    let password = String::from_utf8(output.stdout)
        .map_err(|e| format!("password command output is not valid UTF-8: {}", e))?;

    Ok(password.trim_end_matches('\n').to_string())
}

/// The system keyring, keyed by `email@imap_host`.
pub struct KeyringStore;

impl KeyringStore {
    pub fn set_password(&self, account: &AccountConfig, password: &str) -> Result<(), String> {
        let key = account.credential_key();
        log::debug!("keyring SET: service={SERVICE:?} key={key:?}");
        let entry = keyring::Entry::new(SERVICE, &key).map_err(|e| {
            log::error!("keyring Entry::new failed for key={key:?}: {e}");
            format!("keyring error: {e}")
        })?;
        entry.set_password(password).map_err(|e| {
            log::error!("keyring set_password failed for key={key:?}: {e}");
            format!("keyring set: {e}")
        })
    }

    /// Forget the stored password. A missing entry is not an error.
    pub fn delete_password(&self, account: &AccountConfig) -> Result<(), String> {
        let key = account.credential_key();
        log::debug!("keyring DELETE: service={SERVICE:?} key={key:?}");
        let entry = keyring::Entry::new(SERVICE, &key).map_err(|e| {
            log::error!("keyring Entry::new failed for key={key:?}: {e}");
            format!("keyring error: {e}")
        })?;
        match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => {
                log::error!("keyring delete_credential failed for key={key:?}: {e}");
                Err(format!("keyring delete: {e}"))
            }
        }
    }
}

impl CredentialProvider for KeyringStore {
    fn get_password(&self, account: &AccountConfig) -> Option<String> {
        let key = account.credential_key();
        log::debug!("keyring GET: service={SERVICE:?} key={key:?}");
        let entry = keyring::Entry::new(SERVICE, &key)
            .map_err(|e| log::warn!("keyring Entry::new failed for key={key:?}: {e}"))
            .ok()?;
        entry
            .get_password()
            .map_err(|e| log::debug!("keyring get_password failed for key={key:?}: {e}"))
            .ok()
    }
}

/// Asks on the terminal with echo disabled. Declines when stdin is not a
/// terminal.
pub struct TerminalPrompt;

impl CredentialProvider for TerminalPrompt {
    fn get_password(&self, account: &AccountConfig) -> Option<String> {
        if unsafe { libc::isatty(libc::STDIN_FILENO) } == 0 {
            return None;
        }
        eprint!("Password for {}: ", account.email);
        io::stderr().flush().ok();

        let line = read_without_echo().ok()?;
        eprintln!();
        let password = line.trim_end_matches(['\r', '\n']).to_string();
        if password.is_empty() {
            None
        } else {
            Some(password)
        }
    }
}

fn read_without_echo() -> io::Result<String> {
    let fd = libc::STDIN_FILENO;
    let mut term: libc::termios = unsafe { std::mem::zeroed() };
    if unsafe { libc::tcgetattr(fd, &mut term) } != 0 {
        return Err(io::Error::last_os_error());
    }
    let original = term;
    term.c_lflag &= !libc::ECHO;
    term.c_lflag |= libc::ECHONL;
    if unsafe { libc::tcsetattr(fd, libc::TCSANOW, &term) } != 0 {
        return Err(io::Error::last_os_error());
    }

    let mut line = String::new();
    let result = io::stdin().lock().read_line(&mut line);
    unsafe { libc::tcsetattr(fd, libc::TCSANOW, &original) };
    result.map(|_| line)
}

/// Try the password command, then the keyring, then the terminal.
pub fn resolve_password(account: &AccountConfig) -> Option<(String, CredentialSource)> {
    if let Some(pw) = PasswordCommand.get_password(account) {
        return Some((pw, CredentialSource::Command));
    }
    if let Some(pw) = KeyringStore.get_password(account) {
        return Some((pw, CredentialSource::Keyring));
    }
    TerminalPrompt
        .get_password(account)
        .map(|pw| (pw, CredentialSource::Prompt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_password_command() {
        assert_eq!(run_password_command("echo secret").unwrap(), "secret");
        assert_eq!(run_password_command("printf 'a b'").unwrap(), "a b");
        let err = run_password_command("exit 3").unwrap_err();
        assert!(err.contains("exited"));
    }

    #[test]
    fn test_password_command_provider() {
        let mut account = AccountConfig::new("t", "me@example.com", "imap.example.com");
        assert_eq!(PasswordCommand.get_password(&account), None);

        account.password_command = Some("echo hunter2".to_string());
        assert_eq!(
            PasswordCommand.get_password(&account).as_deref(),
            Some("hunter2")
        );

        account.password_command = Some("false".to_string());
        assert_eq!(PasswordCommand.get_password(&account), None);
    }

    #[test]
    fn test_resolve_prefers_command() {
        let mut account = AccountConfig::new("t", "me@example.com", "imap.example.com");
        account.password_command = Some("echo from-cmd".to_string());
        let (pw, source) = resolve_password(&account).unwrap();
        assert_eq!(pw, "from-cmd");
        assert_eq!(source, CredentialSource::Command);
    }
}
