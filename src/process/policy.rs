use std::collections::BTreeSet;
use crate::errors::WardenError;

/// Binaries any caller may launch.
pub const DEFAULT_ALLOWED_COMMANDS: &[&str] = &[
    "nmap", "masscan", "nikto", "sqlmap", "hydra", "gobuster", "dirb",
    "enum4linux", "smbclient", "rpcclient", "crackmapexec", "netexec",
    "whatweb", "wpscan", "searchsploit", "msfconsole", "msfvenom",
    "nuclei", "feroxbuster", "subfinder",
    "curl", "wget", "ping", "traceroute", "dig", "nslookup", "whois",
    "cat", "ls", "head", "tail", "grep", "find", "wc", "sort", "uniq",
    "python3", "ruby", "perl", "nc", "openssl",
];

/// Characters that are never accepted in a shell command string. `|` is
/// handled separately as the pipe separator.
const SHELL_METACHARS: &[char] = &[';', '&', '`', '$', '(', ')', '<', '>', '\n', '\r'];

/// Allow-list and argument rules shared by every process launch.
#[derive(Debug, Clone)]
pub struct CommandPolicy {
    allowed: BTreeSet<String>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_COMMANDS.iter().copied())
    }
}

impl CommandPolicy {
    pub fn new<I, S>(allowed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed: allowed.into_iter().map(|s| s.as_ref().to_lowercase()).collect(),
        }
    }

    pub fn is_allowed(&self, program: &str) -> bool {
        self.allowed.contains(&base_command(program).to_lowercase())
    }

    pub fn allowed_commands(&self) -> impl Iterator<Item = &str> {
        self.allowed.iter().map(|s| s.as_str())
    }

    /// Check a direct argv launch. The argv never passes through a shell, so
    /// only the program and control characters matter.
    pub fn check_argv(&self, argv: &[String]) -> Result<(), WardenError> {
        let program = argv
            .first()
            .ok_or_else(|| WardenError::CommandRejected("empty command".into()))?;
        if !self.is_allowed(program) {
            return Err(WardenError::CommandRejected(format!(
                "'{}' is not in the allowed command list",
                base_command(program)
            )));
        }
        if let Some(arg) = argv.iter().find(|a| a.contains(['\0', '\n', '\r'])) {
            return Err(WardenError::CommandRejected(format!(
                "argument contains control characters: {:?}",
                arg
            )));
        }
        Ok(())
    }

    /// Validate a shell command string and split it into pipe segments.
    ///
    /// Rejection always happens here, before anything is launched.
    pub fn parse_shell(&self, command: &str) -> Result<Vec<Vec<String>>, WardenError> {
        if command.trim().is_empty() {
            return Err(WardenError::CommandRejected("empty command".into()));
        }
        if let Some(c) = command.chars().find(|c| SHELL_METACHARS.contains(c) || *c == '\0') {
            return Err(WardenError::CommandRejected(format!(
                "shell metacharacter {:?} is not permitted",
                c
            )));
        }

        let segments = tokenize(command)?;
        for segment in &segments {
            let program = segment
                .first()
                .ok_or_else(|| WardenError::CommandRejected("empty pipe segment".into()))?;
            if !self.is_allowed(program) {
                return Err(WardenError::CommandRejected(format!(
                    "'{}' is not in the allowed command list",
                    base_command(program)
                )));
            }
        }
        Ok(segments)
    }
}

fn base_command(program: &str) -> &str {
    program.rsplit('/').next().unwrap_or(program)
}

/// Split on whitespace and unquoted `|`, honouring single and double quotes.
fn tokenize(command: &str) -> Result<Vec<Vec<String>>, WardenError> {
    let mut segments = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut token = String::new();
    let mut in_token = false;
    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => token.push(ch),
                        None => return Err(WardenError::CommandRejected("unterminated single quote".into())),
                    }
                }
            }
            '"' => {
                in_token = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') if matches!(chars.peek(), Some('"') | Some('\\')) => {
                            if let Some(escaped) = chars.next() {
                                token.push(escaped);
                            }
                        }
                        Some(ch) => token.push(ch),
                        None => return Err(WardenError::CommandRejected("unterminated double quote".into())),
                    }
                }
            }
            '|' => {
                if in_token {
                    current.push(std::mem::take(&mut token));
                    in_token = false;
                }
                if current.is_empty() {
                    return Err(WardenError::CommandRejected("empty pipe segment".into()));
                }
                segments.push(std::mem::take(&mut current));
            }
            c if c.is_whitespace() => {
                if in_token {
                    current.push(std::mem::take(&mut token));
                    in_token = false;
                }
            }
            c => {
                in_token = true;
                token.push(c);
            }
        }
    }
    if in_token {
        current.push(token);
    }
    if current.is_empty() {
        return Err(WardenError::CommandRejected("empty pipe segment".into()));
    }
    segments.push(current);
    Ok(segments)
}

/// Render validated segments as a POSIX shell script with every token
/// single-quoted, so the shell only interprets the pipes.
pub fn render_pipeline(segments: &[Vec<String>]) -> String {
    segments
        .iter()
        .map(|segment| {
            segment
                .iter()
                .map(|t| format!("'{}'", t.replace('\'', "'\\''")))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_allowed_argv_passes() {
        let policy = CommandPolicy::default();
        assert!(policy.check_argv(&argv(&["nmap", "-sV", "10.0.0.1"])).is_ok());
        assert!(policy.check_argv(&argv(&["/usr/bin/nmap", "10.0.0.1"])).is_ok());
    }

    #[test]
    fn test_unlisted_binary_rejected() {
        let policy = CommandPolicy::default();
        let err = policy.check_argv(&argv(&["rm", "-rf", "/"])).unwrap_err();
        assert!(matches!(err, WardenError::CommandRejected(_)));
    }

    #[test]
    fn test_argv_control_chars_rejected() {
        let policy = CommandPolicy::default();
        assert!(policy.check_argv(&argv(&["nmap", "10.0.0.1\nrm"])).is_err());
    }

    #[test]
    fn test_argv_semicolon_is_literal() {
        // msfconsole -x takes a console script as a single argument
        let policy = CommandPolicy::default();
        assert!(policy.check_argv(&argv(&["msfconsole", "-q", "-x", "use x; run; exit"])).is_ok());
    }

    #[test]
    fn test_shell_metachars_rejected() {
        let policy = CommandPolicy::default();
        for cmd in [
            "nmap 10.0.0.1; rm -rf /",
            "nmap 10.0.0.1 && id",
            "cat $(whoami)",
            "echo `id`",
            "ls > /tmp/out",
            "nmap 10.0.0.1 &",
        ] {
            assert!(policy.parse_shell(cmd).is_err(), "accepted: {}", cmd);
        }
    }

    #[test]
    fn test_allowed_pipe_chain_accepted() {
        let policy = CommandPolicy::default();
        let segments = policy.parse_shell("nmap -p 80 10.0.0.1 | grep open | wc -l").unwrap();
        assert_eq!(segments.len(), 3);
        assert_eq!(segments[1], argv(&["grep", "open"]));
    }

    #[test]
    fn test_pipe_into_unlisted_binary_rejected() {
        let policy = CommandPolicy::default();
        assert!(policy.parse_shell("cat /etc/hosts | bash").is_err());
        assert!(policy.parse_shell("nmap 10.0.0.1 || id").is_err());
        assert!(policy.parse_shell("| grep x").is_err());
    }

    #[test]
    fn test_quoted_arguments() {
        let policy = CommandPolicy::default();
        let segments = policy.parse_shell(r#"grep "open port" 'a|b'"#).unwrap();
        assert_eq!(segments, vec![argv(&["grep", "open port", "a|b"])]);
    }

    #[test]
    fn test_unterminated_quote_rejected() {
        let policy = CommandPolicy::default();
        assert!(policy.parse_shell("grep 'open").is_err());
    }

    #[test]
    fn test_render_pipeline_quotes_tokens() {
        let rendered = render_pipeline(&[argv(&["grep", "it's"]), argv(&["wc", "-l"])]);
        assert_eq!(rendered, r#"'grep' 'it'\''s' | 'wc' '-l'"#);
    }

    #[test]
    fn test_custom_policy() {
        let policy = CommandPolicy::new(["echo"]);
        assert!(policy.is_allowed("ECHO"));
        assert!(!policy.is_allowed("nmap"));
    }
}
