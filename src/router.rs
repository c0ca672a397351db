use crate::error::MailError;
use crate::store::types::SearchScope;

/// A parsed line of user input.
#[derive(Debug)]
pub enum Intent {
    Inbox { page: Option<u32> },
    Read(usize),
    /// A bare number typed at the prompt.
    ReadByNumber(usize),
    Reply,
    Compose,
    Forward { to: String },
    Search { text: String, scope: SearchScope },
    /// Bare text typed at the prompt.
    QuickSearch(String),
    Folders,
    Switch { folder: String },
    Star(Option<usize>),
    Delete(Option<usize>),
    Archive(Option<usize>),
    Save(Option<usize>),
    Account,
    Logout,
    Refresh,
    Help,
    Quit,
    Empty,
    Invalid(MailError),
}

pub struct CommandDef {
    pub name: &'static str,
    pub aliases: &'static [&'static str],
    pub args: &'static str,
    pub description: &'static str,
}

pub const COMMANDS: &[CommandDef] = &[
    CommandDef {
        name: "inbox",
        aliases: &["i", "ls"],
        args: "[page]",
        description: "List emails in the current folder",
    },
    CommandDef {
        name: "read",
        aliases: &["r", "open"],
        args: "<n>",
        description: "Read an email",
    },
    CommandDef {
        name: "reply",
        aliases: &["re"],
        args: "",
        description: "Reply to the open email",
    },
    CommandDef {
        name: "compose",
        aliases: &["c", "new"],
        args: "",
        description: "Compose a new email",
    },
    CommandDef {
        name: "forward",
        aliases: &["fwd"],
        args: "<address>",
        description: "Forward the open email",
    },
    CommandDef {
        name: "search",
        aliases: &["s", "find"],
        args: "[from:|subject:]<query>",
        description: "Search the current folder",
    },
    CommandDef {
        name: "folders",
        aliases: &["f"],
        args: "",
        description: "List folders",
    },
    CommandDef {
        name: "switch",
        aliases: &["sw", "cd"],
        args: "<folder>",
        description: "Switch folder",
    },
    CommandDef {
        name: "star",
        aliases: &["flag"],
        args: "[n]",
        description: "Toggle star",
    },
    CommandDef {
        name: "delete",
        aliases: &["del", "rm"],
        args: "[n]",
        description: "Delete an email",
    },
    CommandDef {
        name: "archive",
        aliases: &["ar"],
        args: "[n]",
        description: "Archive an email",
    },
    CommandDef {
        name: "save",
        aliases: &[],
        args: "[n]",
        description: "Save attachments",
    },
    CommandDef {
        name: "account",
        aliases: &["acc", "whoami"],
        args: "",
        description: "Show account info",
    },
    CommandDef {
        name: "logout",
        aliases: &[],
        args: "",
        description: "Log out and forget this account",
    },
    CommandDef {
        name: "refresh",
        aliases: &["ref"],
        args: "",
        description: "Reload the current page",
    },
    CommandDef {
        name: "help",
        aliases: &["h", "?"],
        args: "",
        description: "Show help",
    },
    CommandDef {
        name: "quit",
        aliases: &["q", "exit"],
        args: "",
        description: "Exit",
    },
];

/// Canonical command for a name or alias, case-insensitively.
pub fn lookup(word: &str) -> Option<&'static CommandDef> {
    let word = word.to_lowercase();
    COMMANDS
        .iter()
        .find(|c| c.name == word || c.aliases.contains(&word.as_str()))
}

/// Closest command name within edit distance 2.
pub fn suggest(word: &str) -> Option<&'static str> {
    let word = word.to_lowercase();
    COMMANDS
        .iter()
        .flat_map(|c| {
            std::iter::once(c.name)
                .chain(c.aliases.iter().copied())
                .map(move |w| (c.name, w))
        })
        .map(|(name, w)| (edit_distance(&word, w), name))
        .filter(|(d, _)| *d <= 2)
        .min_by_key(|(d, _)| *d)
        .map(|(_, name)| name)
}

fn edit_distance(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.chars().enumerate() {
        let mut cur = vec![i + 1; b.len() + 1];
        for (j, cb) in b.iter().enumerate() {
            let cost = if ca == *cb { 0 } else { 1 };
            cur[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(cur[j] + 1);
        }
        prev = cur;
    }
    prev[b.len()]
}

fn usage(def: &CommandDef) -> Intent {
    Intent::Invalid(MailError::State(format!(
        "usage: /{} {}",
        def.name, def.args
    )))
}

fn ordinal(def: &CommandDef, arg: Option<&str>) -> Result<Option<usize>, Intent> {
    match arg {
        None => Ok(None),
        Some(a) => match a.parse::<usize>() {
            Ok(n) if n >= 1 => Ok(Some(n)),
            _ => Err(usage(def)),
        },
    }
}

/// Parse one line of input. Never fails: bad input becomes
/// [`Intent::Invalid`].
pub fn parse(raw: &str) -> Intent {
    let line = raw.trim();
    if line.is_empty() {
        return Intent::Empty;
    }

    let Some(command_line) = line.strip_prefix('/') else {
        if line.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(n) = line.parse::<usize>() {
                return Intent::ReadByNumber(n);
            }
        }
        return Intent::QuickSearch(line.to_string());
    };

    let mut words = command_line.split_whitespace();
    let word = words.next().unwrap_or("");
    let args: Vec<&str> = words.collect();
    let rest = args.join(" ");

    let Some(def) = lookup(word) else {
        return Intent::Invalid(MailError::UnknownCommand {
            input: word.to_string(),
            suggestion: if word.is_empty() {
                None
            } else {
                suggest(word).map(|s| s.to_string())
            },
        });
    };

    let first = args.first().copied();
    let parsed = match def.name {
        "inbox" => match first {
            None => Ok(Intent::Inbox { page: None }),
            Some(a) => match a.parse::<u32>() {
                Ok(p) if p >= 1 => Ok(Intent::Inbox { page: Some(p) }),
                _ => Err(usage(def)),
            },
        },
        "read" => match ordinal(def, first) {
            Ok(Some(n)) => Ok(Intent::Read(n)),
            Ok(None) => Err(usage(def)),
            Err(e) => Err(e),
        },
        "reply" => Ok(Intent::Reply),
        "compose" => Ok(Intent::Compose),
        "forward" => match first {
            Some(to) if to.contains('@') => Ok(Intent::Forward { to: to.to_string() }),
            _ => Err(usage(def)),
        },
        "search" => parse_search(&rest).ok_or_else(|| usage(def)),
        "folders" => Ok(Intent::Folders),
        "switch" if rest.is_empty() => Err(usage(def)),
        "switch" => Ok(Intent::Switch { folder: rest }),
        "star" => ordinal(def, first).map(Intent::Star),
        "delete" => ordinal(def, first).map(Intent::Delete),
        "archive" => ordinal(def, first).map(Intent::Archive),
        "save" => ordinal(def, first).map(Intent::Save),
        "account" => Ok(Intent::Account),
        "logout" => Ok(Intent::Logout),
        "refresh" => Ok(Intent::Refresh),
        "help" => Ok(Intent::Help),
        "quit" => Ok(Intent::Quit),
        _ => Err(usage(def)),
    };
    parsed.unwrap_or_else(|invalid| invalid)
}

/// Answer to a yes/no question typed at the terminal. An empty answer or
/// closed input takes `default`.
pub fn parse_answer(answer: Option<&str>, default: bool) -> bool {
    match answer.map(|a| a.trim().to_lowercase()) {
        None => default,
        Some(a) if a.is_empty() => default,
        Some(a) => a == "y" || a == "yes",
    }
}

/// Answer to a confirm payload in JSON mode: only `{"confirm": true}`
/// agrees.
pub fn parse_json_answer(line: Option<&str>) -> bool {
    line.and_then(|l| serde_json::from_str::<serde_json::Value>(l.trim()).ok())
        .and_then(|v| v.get("confirm").and_then(|c| c.as_bool()))
        .unwrap_or(false)
}

fn strip_prefix_ci<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&text[prefix.len()..])
    } else {
        None
    }
}

fn parse_search(rest: &str) -> Option<Intent> {
    let rest = rest.trim();
    let (scope, text) = if let Some(text) = strip_prefix_ci(rest, "from:") {
        (SearchScope::Sender, text)
    } else if let Some(text) = strip_prefix_ci(rest, "subject:") {
        (SearchScope::Subject, text)
    } else {
        (SearchScope::Both, rest)
    };
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    Some(Intent::Search {
        text: text.to_string(),
        scope,
    })
}
