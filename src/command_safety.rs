//! Command safety analysis for shell lines.
//!
//! Lines are checked before anything is spawned: package installs are
//! recognized so they can be routed to the session interpreter, and any
//! whitespace token matching the denylist blocks the line outright.

/// Fixed refusal returned in place of output for a blocked line.
pub const BLOCKED_MESSAGE: &str = "ERROR: Potentially dangerous command blocked for security reasons";

/// Destructive operations refused by whole-token match.
pub const DENYLIST: &[&str] = &[
    "rm", "shutdown", "reboot", "del", "format", "mv", "dd", "kill",
];

/// Package managers whose `install` verb is special-cased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PackageManager {
    /// `pip`/`pip3`, rewritten to `<python> -m pip`.
    Pip,
    /// `conda`, run through the host shell as written.
    Conda,
}

impl PackageManager {
    /// Prefix used on failure observations.
    #[must_use]
    pub fn error_label(self) -> &'static str {
        match self {
            Self::Pip => "PIP INSTALL ERROR",
            Self::Conda => "CONDA INSTALL ERROR",
        }
    }
}

/// Safety classification of a shell line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SafetyLevel {
    /// Nothing special; run through the host shell.
    Allowed,
    /// `<manager> install ...`; `args` are the tokens after `install`.
    PackageInstall {
        manager: PackageManager,
        args: Vec<String>,
    },
    /// At least one token is denylisted.
    Blocked { matched: Vec<String> },
}

/// Result of analyzing a command.
#[derive(Debug, Clone)]
pub struct SafetyAnalysis {
    pub level: SafetyLevel,
    pub command: String,
}

impl SafetyAnalysis {
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self.level, SafetyLevel::Blocked { .. })
    }
}

/// Denylist in effect for one runner: the built-in names plus configured extras.
#[derive(Debug, Clone)]
pub struct Denylist {
    names: Vec<String>,
}

impl Default for Denylist {
    fn default() -> Self {
        Self {
            names: DENYLIST.iter().map(|name| (*name).to_string()).collect(),
        }
    }
}

impl Denylist {
    /// Built-in names extended with `extra`; duplicates are ignored.
    #[must_use]
    pub fn with_extra<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut list = Self::default();
        for name in extra {
            let name = name.into();
            let name = name.trim();
            if !name.is_empty() && !list.names.iter().any(|existing| existing == name) {
                list.names.push(name.to_string());
            }
        }
        list
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Tokens of `command` that exactly match a denylisted name.
    #[must_use]
    pub fn matches(&self, command: &str) -> Vec<String> {
        command
            .split_whitespace()
            .filter(|token| self.names.iter().any(|name| name == token))
            .map(str::to_string)
            .collect()
    }
}

/// Recognize `pip install ...`, `pip3 install ...` and `conda install ...`.
#[must_use]
pub fn package_install(command: &str) -> Option<(PackageManager, Vec<String>)> {
    let mut tokens = command.split_whitespace();
    let manager = match tokens.next()? {
        "pip" | "pip3" => PackageManager::Pip,
        "conda" => PackageManager::Conda,
        _ => return None,
    };
    if tokens.next()? != "install" {
        return None;
    }
    Some((manager, tokens.map(str::to_string).collect()))
}

/// Analyze a shell line.
///
/// `pip` installs are executed without a shell, so the denylist does not
/// apply to their arguments. `conda` installs go through the shell and are
/// gated like any other line.
#[must_use]
pub fn analyze_command(command: &str, denylist: &Denylist) -> SafetyAnalysis {
    let install = package_install(command);

    if let Some((PackageManager::Pip, args)) = install {
        return SafetyAnalysis {
            level: SafetyLevel::PackageInstall {
                manager: PackageManager::Pip,
                args,
            },
            command: command.to_string(),
        };
    }

    let matched = denylist.matches(command);
    let level = if !matched.is_empty() {
        SafetyLevel::Blocked { matched }
    } else if let Some((manager, args)) = install {
        SafetyLevel::PackageInstall { manager, args }
    } else {
        SafetyLevel::Allowed
    };

    SafetyAnalysis {
        level,
        command: command.to_string(),
    }
}

// === Unit Tests ===

#[cfg(test)]
mod tests {
    use super::*;

    fn level(command: &str) -> SafetyLevel {
        analyze_command(command, &Denylist::default()).level
    }

    #[test]
    fn test_every_denylisted_name_is_blocked() {
        for name in DENYLIST {
            let analysis = analyze_command(&format!("{name} something"), &Denylist::default());
            assert!(analysis.is_blocked(), "{name} should be blocked");
        }
    }

    #[test]
    fn test_token_anywhere_in_line_blocks() {
        assert_eq!(
            level("ls && rm -rf build"),
            SafetyLevel::Blocked {
                matched: vec!["rm".to_string()]
            }
        );
        assert!(matches!(level("echo hi ; kill 1"), SafetyLevel::Blocked { .. }));
    }

    #[test]
    fn test_substrings_are_not_blocked() {
        assert_eq!(level("ls ./rm_me"), SafetyLevel::Allowed);
        assert_eq!(level("cat format.txt"), SafetyLevel::Allowed);
        assert_eq!(level("echo removed"), SafetyLevel::Allowed);
    }

    #[test]
    fn test_safe_commands() {
        assert_eq!(level("ls -la"), SafetyLevel::Allowed);
        assert_eq!(level("echo hi"), SafetyLevel::Allowed);
        assert_eq!(level("python --version"), SafetyLevel::Allowed);
    }

    #[test]
    fn test_pip_install_is_recognized() {
        assert_eq!(
            level("pip install pandas==2.2 numpy"),
            SafetyLevel::PackageInstall {
                manager: PackageManager::Pip,
                args: vec!["pandas==2.2".to_string(), "numpy".to_string()],
            }
        );
        assert!(matches!(
            level("pip3 install -U seaborn"),
            SafetyLevel::PackageInstall {
                manager: PackageManager::Pip,
                ..
            }
        ));
    }

    #[test]
    fn test_pip_other_verbs_are_plain_commands() {
        assert_eq!(level("pip list"), SafetyLevel::Allowed);
        assert_eq!(level("pip"), SafetyLevel::Allowed);
    }

    #[test]
    fn test_conda_install_is_gated() {
        assert!(matches!(
            level("conda install -y scipy"),
            SafetyLevel::PackageInstall {
                manager: PackageManager::Conda,
                ..
            }
        ));
        assert!(matches!(
            level("conda install scipy && rm -rf /"),
            SafetyLevel::Blocked { .. }
        ));
    }

    #[test]
    fn test_extra_denylist_entries() {
        let denylist = Denylist::with_extra(["curl", " ", "rm"]);
        assert_eq!(denylist.names().len(), DENYLIST.len() + 1);
        assert!(analyze_command("curl http://x", &denylist).is_blocked());
    }

    #[test]
    fn test_error_labels() {
        assert_eq!(PackageManager::Pip.error_label(), "PIP INSTALL ERROR");
        assert_eq!(PackageManager::Conda.error_label(), "CONDA INSTALL ERROR");
    }
}
