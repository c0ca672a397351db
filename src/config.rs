use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountConfig {
    pub name: String,
    pub email: String,
    pub display_name: String,
    pub imap_host: String,
    pub imap_port: u16,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub use_tls: bool,
    #[serde(skip)]
    pub password_command: Option<String>,
}

impl AccountConfig {
    /// Account with the conventional ports and an SMTP host derived from
    /// the IMAP host (`imap.example.com` -> `smtp.example.com`).
    pub fn new(name: &str, email: &str, imap_host: &str) -> Self {
        AccountConfig {
            name: name.to_string(),
            email: email.to_string(),
            display_name: default_display_name(email),
            imap_host: imap_host.to_string(),
            imap_port: DEFAULT_IMAP_PORT,
            smtp_host: derive_smtp_host(imap_host),
            smtp_port: DEFAULT_SMTP_PORT,
            use_tls: true,
            password_command: None,
        }
    }

    /// Key under which the password is kept in the system keyring.
    pub fn credential_key(&self) -> String {
        format!("{}@{}", self.email, self.imap_host)
    }
}

#[derive(Debug)]
pub struct Config {
    pub default_account: Option<String>,
    pub accounts: Vec<AccountConfig>,
    pub ui: UiConfig,
    pub mail: MailConfig,
}

#[derive(Debug)]
pub struct UiConfig {
    pub editor: Option<String>,
    pub page_size: u32,
    pub request_timeout_secs: u64,
    pub download_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub struct MailConfig {
    pub archive_folder: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(String),
}

const DEFAULT_IMAP_PORT: u16 = 993;
const DEFAULT_SMTP_PORT: u16 = 587;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    default_account: Option<String>,
    #[serde(default)]
    ui: RawUiConfig,
    #[serde(default)]
    mail: RawMailConfig,
    #[serde(default)]
    account: BTreeMap<String, RawAccountFields>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawUiConfig {
    #[serde(default)]
    editor: Option<String>,
    #[serde(default = "default_page_size")]
    page_size: u32,
    #[serde(default = "default_request_timeout_secs")]
    request_timeout_secs: u64,
    #[serde(default)]
    download_dir: Option<PathBuf>,
}

impl Default for RawUiConfig {
    fn default() -> Self {
        Self {
            editor: None,
            page_size: default_page_size(),
            request_timeout_secs: default_request_timeout_secs(),
            download_dir: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMailConfig {
    #[serde(default)]
    archive_folder: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawAccountFields {
    email: Option<String>,
    imap_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    imap_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    smtp_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    smtp_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    use_tls: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    password_command: Option<String>,
}

fn default_page_size() -> u32 {
    20
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_display_name(email: &str) -> String {
    email.split('@').next().unwrap_or(email).to_string()
}

fn derive_smtp_host(imap_host: &str) -> String {
    imap_host.replacen("imap", "smtp", 1)
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    fn parse(contents: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

        if raw.ui.page_size == 0 {
            return Err(ConfigError::Parse(
                "page_size must be greater than 0".to_string(),
            ));
        }
        if raw.ui.request_timeout_secs == 0 {
            return Err(ConfigError::Parse(
                "request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        let mut accounts = Vec::new();
        for (name, account) in raw.account {
            let email = require_field(
                account.email,
                &format!("missing email in [account.{}]", name),
            )?;
            let imap_host = require_field(
                account.imap_host,
                &format!("missing imap_host in [account.{}]", name),
            )?;
            let imap_port = account.imap_port.unwrap_or(DEFAULT_IMAP_PORT);
            let smtp_port = account.smtp_port.unwrap_or(DEFAULT_SMTP_PORT);
            if imap_port == 0 || smtp_port == 0 {
                return Err(ConfigError::Parse(format!(
                    "ports must be between 1 and 65535 in [account.{}]",
                    name
                )));
            }
            accounts.push(AccountConfig {
                display_name: account
                    .display_name
                    .unwrap_or_else(|| default_display_name(&email)),
                smtp_host: account
                    .smtp_host
                    .unwrap_or_else(|| derive_smtp_host(&imap_host)),
                imap_port,
                smtp_port,
                use_tls: account.use_tls.unwrap_or(true),
                password_command: account.password_command,
                name,
                email,
                imap_host,
            });
        }

        if let Some(ref default) = raw.default_account {
            if !accounts.iter().any(|a| &a.name == default) {
                return Err(ConfigError::Parse(format!(
                    "default_account '{}' has no [account.{}] section",
                    default, default
                )));
            }
        }

        Ok(Config {
            default_account: raw.default_account,
            accounts,
            ui: UiConfig {
                editor: raw.ui.editor,
                page_size: raw.ui.page_size,
                request_timeout_secs: raw.ui.request_timeout_secs,
                download_dir: raw.ui.download_dir,
            },
            mail: MailConfig {
                archive_folder: raw.mail.archive_folder,
            },
        })
    }

    /// The named account, else the default account, else the first one.
    pub fn account(&self, name: Option<&str>) -> Option<&AccountConfig> {
        match name.or(self.default_account.as_deref()) {
            Some(name) => self.accounts.iter().find(|a| a.name == name),
            None => self.accounts.first(),
        }
    }
}

/// Add an `[account.NAME]` section to the config file at `path`, creating
/// the file if needed. The first account written becomes the default.
pub fn save_account(path: &Path, account: &AccountConfig) -> Result<(), ConfigError> {
    let mut table: toml::Table = if path.exists() {
        let contents = fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?
    } else {
        toml::Table::new()
    };

    let fields = RawAccountFields {
        email: Some(account.email.clone()),
        imap_host: Some(account.imap_host.clone()),
        imap_port: Some(account.imap_port),
        smtp_host: Some(account.smtp_host.clone()),
        smtp_port: Some(account.smtp_port),
        use_tls: Some(account.use_tls),
        display_name: Some(account.display_name.clone()),
        password_command: account.password_command.clone(),
    };
    let value = toml::Value::try_from(&fields).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let accounts = table
        .entry("account")
        .or_insert_with(|| toml::Value::Table(toml::Table::new()));
    match accounts {
        toml::Value::Table(accounts) => {
            accounts.insert(account.name.clone(), value);
        }
        _ => return Err(ConfigError::Parse("'account' must be a table".to_string())),
    }
    if !table.contains_key("default_account") {
        table.insert(
            "default_account".to_string(),
            toml::Value::String(account.name.clone()),
        );
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let serialized = toml::to_string(&table).map_err(|e| ConfigError::Parse(e.to_string()))?;
    fs::write(path, serialized)?;
    Ok(())
}

/// Drop the `[account.NAME]` section from the config file at `path`. When it
/// was the default, the next remaining account takes over, or the key goes
/// away with the last one. Returns whether a section was removed.
pub fn remove_account(path: &Path, name: &str) -> Result<bool, ConfigError> {
    if !path.exists() {
        return Ok(false);
    }
    let contents = fs::read_to_string(path)?;
    let mut table: toml::Table =
        toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let (removed, next) = match table.get_mut("account") {
        Some(toml::Value::Table(accounts)) => {
            let removed = accounts.remove(name).is_some();
            (removed, accounts.keys().next().cloned())
        }
        Some(_) => return Err(ConfigError::Parse("'account' must be a table".to_string())),
        None => (false, None),
    };
    if !removed {
        return Ok(false);
    }

    let was_default = table
        .get("default_account")
        .and_then(|v| v.as_str())
        .is_some_and(|d| d == name);
    if was_default {
        match next {
            Some(next) => {
                table.insert("default_account".to_string(), toml::Value::String(next));
            }
            None => {
                table.remove("default_account");
            }
        }
    }

    let serialized = toml::to_string(&table).map_err(|e| ConfigError::Parse(e.to_string()))?;
    fs::write(path, serialized)?;
    log::info!("removed account '{}' from {}", name, path.display());
    Ok(true)
}

/// Well-known server settings for an email domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDefaults {
    pub imap_host: &'static str,
    pub imap_port: u16,
    pub smtp_host: &'static str,
    pub smtp_port: u16,
    pub use_tls: bool,
}

const fn provider(imap_host: &'static str, smtp_host: &'static str) -> ProviderDefaults {
    ProviderDefaults {
        imap_host,
        imap_port: DEFAULT_IMAP_PORT,
        smtp_host,
        smtp_port: DEFAULT_SMTP_PORT,
        use_tls: true,
    }
}

pub fn guess_provider(email: &str) -> Option<ProviderDefaults> {
    let (_, domain) = email.split_once('@')?;
    let defaults = match domain.to_lowercase().as_str() {
        "gmail.com" | "googlemail.com" => provider("imap.gmail.com", "smtp.gmail.com"),
        "outlook.com" | "hotmail.com" => {
            provider("outlook.office365.com", "smtp.office365.com")
        }
        "yahoo.com" => provider("imap.mail.yahoo.com", "smtp.mail.yahoo.com"),
        "icloud.com" => provider("imap.mail.me.com", "smtp.mail.me.com"),
        "fastmail.com" => provider("imap.fastmail.com", "smtp.fastmail.com"),
        // Proton Mail is only reachable through the local Bridge daemon.
        "protonmail.com" | "proton.me" => ProviderDefaults {
            imap_host: "127.0.0.1",
            imap_port: 1143,
            smtp_host: "127.0.0.1",
            smtp_port: 1025,
            use_tls: false,
        },
        _ => return None,
    };
    Some(defaults)
}

fn require_field(value: Option<String>, err: &str) -> Result<String, ConfigError> {
    value.ok_or_else(|| ConfigError::Parse(err.to_string()))
}
