//! Shell capability: helper injection and marker-wrapped invocations.
//!
//! Each supported shell dialect knows how to define a `__silc_exec` helper
//! that prints `__SILC_BEGIN_<token>__` before a command and
//! `__SILC_END_<token>__:<exit code>` after it, how to invoke that helper
//! with a user command safely quoted, and what its idle prompt looks like.

use std::fmt;
use std::str::FromStr;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::SilcError;

/// Supported shell dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShellKind {
    Bash,
    Zsh,
    Sh,
    Cmd,
    Pwsh,
}

impl ShellKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShellKind::Bash => "bash",
            ShellKind::Zsh => "zsh",
            ShellKind::Sh => "sh",
            ShellKind::Cmd => "cmd",
            ShellKind::Pwsh => "pwsh",
        }
    }
}

impl fmt::Display for ShellKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShellKind {
    type Err = SilcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bash" => Ok(ShellKind::Bash),
            "zsh" => Ok(ShellKind::Zsh),
            "sh" => Ok(ShellKind::Sh),
            "cmd" => Ok(ShellKind::Cmd),
            "pwsh" | "powershell" => Ok(ShellKind::Pwsh),
            other => Err(SilcError::Other(format!("unknown shell: {other}"))),
        }
    }
}

/// A shell dialect bound to a concrete executable path.
#[derive(Debug, Clone)]
pub struct ShellCapability {
    pub kind: ShellKind,
    pub path: String,
    prompt: Regex,
}

impl ShellCapability {
    pub fn new(kind: ShellKind, path: impl Into<String>) -> Self {
        let prompt = match kind {
            ShellKind::Bash => Regex::new(r".*[$#] $"),
            ShellKind::Zsh => Regex::new(r".*[%#$] $"),
            ShellKind::Sh => Regex::new(r"[$#] $"),
            ShellKind::Cmd => Regex::new(r"[A-Z]:\\.*>"),
            ShellKind::Pwsh => Regex::new(r"PS .*>"),
        }
        .expect("prompt regex");

        Self {
            kind,
            path: path.into(),
            prompt,
        }
    }

    /// Detect the current shell, with a safe fallback when detection fails.
    pub fn detect() -> Self {
        if cfg!(windows) {
            if std::env::var_os("PSModulePath").is_some() {
                return Self::new(ShellKind::Pwsh, "pwsh.exe");
            }
            return Self::new(ShellKind::Cmd, "cmd.exe");
        }

        let path = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
        let name = path.rsplit('/').next().unwrap_or("");
        if name.contains("zsh") {
            Self::new(ShellKind::Zsh, path)
        } else if name.contains("bash") {
            Self::new(ShellKind::Bash, path)
        } else {
            Self::new(ShellKind::Sh, path)
        }
    }

    /// Resolve a requested dialect to its conventional executable.
    pub fn for_kind(kind: ShellKind) -> Self {
        match kind {
            ShellKind::Bash => Self::new(kind, "/bin/bash"),
            ShellKind::Zsh => Self::new(kind, "/bin/zsh"),
            ShellKind::Sh => Self::new(kind, "/bin/sh"),
            ShellKind::Cmd => Self::new(kind, "cmd.exe"),
            ShellKind::Pwsh => Self::new(kind, "pwsh.exe"),
        }
    }

    /// Regex matching this shell's idle prompt.
    pub fn prompt_pattern(&self) -> &Regex {
        &self.prompt
    }

    /// The newline this dialect expects on its input.
    pub fn newline(&self) -> &'static str {
        match self.kind {
            ShellKind::Cmd | ShellKind::Pwsh => "\r\n",
            _ => "\n",
        }
    }

    /// One-time script defining the `__silc_exec` helper.
    ///
    /// Empty for `cmd`, which has no persistent function facility; its
    /// invocation inlines the markers instead.
    pub fn helper_script(&self) -> String {
        match self.kind {
            ShellKind::Bash | ShellKind::Zsh | ShellKind::Sh => concat!(
                "__silc_exec() { ",
                "printf '__SILC_BEGIN_%s__\\n' \"$2\"; ",
                "eval \"$1\"; __silc_status=$?; ",
                "printf '__SILC_END_%s__:%s\\n' \"$2\" \"$__silc_status\"; ",
                "}"
            )
            .to_string(),
            ShellKind::Pwsh => concat!(
                "function __silc_exec { param($Cmd, $Token) ",
                "Write-Output \"__SILC_BEGIN_${Token}__\"; ",
                "Invoke-Expression $Cmd; ",
                "$code = $LASTEXITCODE; ",
                "if ($null -eq $code) { $code = if ($?) { 0 } else { 1 } }; ",
                "Write-Output \"__SILC_END_${Token}__:$code\" }"
            )
            .to_string(),
            ShellKind::Cmd => String::new(),
        }
    }

    /// A single invocation that runs `command` between the token markers.
    pub fn invocation(&self, command: &str, token: &str) -> String {
        match self.kind {
            ShellKind::Bash | ShellKind::Zsh | ShellKind::Sh => {
                let quoted = command.replace('\'', "'\\''");
                format!("__silc_exec '{quoted}' {token}")
            }
            ShellKind::Pwsh => {
                let quoted = command.replace('\'', "''");
                format!("__silc_exec -Cmd '{quoted}' -Token {token}")
            }
            // cmd has no helper function; markers are sent as separate lines
            // so %ERRORLEVEL% expands after the command has run.
            ShellKind::Cmd => [
                format!("echo __SILC_BEGIN_{token}__"),
                format!("call {command}"),
                format!("echo __SILC_END_{token}__:%ERRORLEVEL%"),
            ]
            .join("\r\n"),
        }
    }
}
