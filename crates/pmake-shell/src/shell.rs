//! Shell dialect descriptors.
//!
//! Three dialects are built in (`sh`, `ksh`, `csh`). A `.SHELL` line either
//! picks one of them by name or path, or describes a complete custom dialect
//! with `keyword=value` words.

use serde::{Deserialize, Serialize};

use pmake_types::{MakeError, Result};

use crate::words::split_words;

const DEFAULT_SHELL_DIR: &str = "/bin";

/// Everything pmake needs to know to drive one shell dialect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shell {
    /// Name used to find a built-in dialect and as `argv[0]`.
    pub name: String,
    /// Absolute path of the executable.
    pub path: String,
    /// True if `echo_off`/`echo_on` can toggle command echoing.
    pub has_echo_ctl: bool,
    pub echo_off: String,
    pub echo_on: String,
    /// Text the shell prints when echo is turned off; stripped from job output.
    pub no_print: String,
    /// True if `err_off`/`err_on` can toggle exit-on-error.
    pub has_err_ctl: bool,
    pub err_on: String,
    pub err_off: String,
    /// Template that echoes a command which is not echoed by the shell itself.
    pub echo_tmpl: String,
    /// Template that runs a command while ignoring its exit status.
    pub run_ign_tmpl: String,
    /// Template that runs a command and exits the script if it fails.
    pub run_chk_tmpl: String,
    /// How a newline is written inside a quoted word (`:Q`).
    pub newline: String,
    pub comment_char: char,
    /// Flag that makes the shell echo each command (without the dash).
    pub echo_flag: String,
    /// Flag that makes the shell exit on the first error (without the dash).
    pub err_flag: String,
}

impl Default for Shell {
    fn default() -> Self {
        Self::sh()
    }
}

impl Shell {
    /// The Bourne shell. No echo or error control; commands are wrapped in
    /// `{ cmd \n} || exit $?` to stop at the first failure.
    pub fn sh() -> Self {
        Self {
            name: "sh".into(),
            path: format!("{DEFAULT_SHELL_DIR}/sh"),
            has_echo_ctl: false,
            echo_off: String::new(),
            echo_on: String::new(),
            no_print: String::new(),
            has_err_ctl: false,
            err_on: String::new(),
            err_off: String::new(),
            echo_tmpl: "echo \"%s\"\n".into(),
            run_ign_tmpl: "%s\n".into(),
            run_chk_tmpl: "{ %s \n} || exit $?\n".into(),
            newline: "'\n'".into(),
            comment_char: '#',
            echo_flag: String::new(),
            err_flag: String::new(),
        }
    }

    /// The Korn shell, which can toggle echoing with `set -v`.
    pub fn ksh() -> Self {
        Self {
            name: "ksh".into(),
            path: format!("{DEFAULT_SHELL_DIR}/ksh"),
            has_echo_ctl: true,
            echo_off: "set +v".into(),
            echo_on: "set -v".into(),
            no_print: "set +v".into(),
            has_err_ctl: false,
            err_on: String::new(),
            err_off: String::new(),
            echo_tmpl: "echo \"%s\"\n".into(),
            run_ign_tmpl: "%s\n".into(),
            run_chk_tmpl: "{ %s \n} || exit $?\n".into(),
            newline: "'\n'".into(),
            comment_char: '#',
            echo_flag: "v".into(),
            err_flag: String::new(),
        }
    }

    /// The C shell. Echo control through the `verbose` variable; errors can
    /// only be ignored by running the command in a subshell.
    pub fn csh() -> Self {
        Self {
            name: "csh".into(),
            path: format!("{DEFAULT_SHELL_DIR}/csh"),
            has_echo_ctl: true,
            echo_off: "unset verbose".into(),
            echo_on: "set verbose".into(),
            no_print: "unset verbose".into(),
            has_err_ctl: false,
            err_on: String::new(),
            err_off: String::new(),
            echo_tmpl: "echo \"%s\"\n".into(),
            run_ign_tmpl: "csh -c \"%s || exit 0\"\n".into(),
            run_chk_tmpl: String::new(),
            newline: "'\\\n'".into(),
            comment_char: '#',
            echo_flag: "v".into(),
            err_flag: "e".into(),
        }
    }

    /// Look up a built-in dialect by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "sh" => Some(Self::sh()),
            "ksh" => Some(Self::ksh()),
            "csh" => Some(Self::csh()),
            _ => None,
        }
    }

    /// `-e`-style flag passed when a command must stop on error, if any.
    pub fn err_flag_arg(&self) -> Option<String> {
        if self.err_flag.is_empty() {
            None
        } else if self.err_flag.starts_with('-') {
            Some(self.err_flag.clone())
        } else {
            Some(format!("-{}", self.err_flag))
        }
    }

    /// Arguments after `argv[0]` for a shell reading a job script on stdin.
    ///
    /// When a flag lacks its dash the two are merged into one word, because
    /// some shells treat a second argument as a script file to source.
    pub fn script_args(&self, echo: bool, ignore_errors: bool) -> Vec<String> {
        let err = if ignore_errors { "" } else { self.err_flag.as_str() };
        let echo_flag = if echo { self.echo_flag.as_str() } else { "" };
        let mut args = Vec::new();
        if !self.err_flag.starts_with('-') || !self.echo_flag.starts_with('-') {
            let merged = format!(
                "-{}{}",
                err.trim_start_matches('-'),
                echo_flag.trim_start_matches('-')
            );
            if merged.len() > 1 {
                args.push(merged);
            }
        } else {
            if !err.is_empty() {
                args.push(err.to_string());
            }
            if !echo_flag.is_empty() {
                args.push(echo_flag.to_string());
            }
        }
        args
    }

    /// Parse the sources of a `.SHELL` line.
    ///
    /// `name=` alone selects a built-in dialect. `path=` alone selects the
    /// built-in whose name is the last path component, using the given path.
    /// Any other keyword describes a full custom dialect.
    pub fn parse_spec(line: &str) -> Result<Self> {
        let words = split_words(line, true)?;
        let mut custom = Shell {
            name: String::new(),
            path: String::new(),
            has_echo_ctl: false,
            echo_off: String::new(),
            echo_on: String::new(),
            no_print: String::new(),
            has_err_ctl: false,
            err_on: String::new(),
            err_off: String::new(),
            echo_tmpl: String::new(),
            run_ign_tmpl: String::new(),
            run_chk_tmpl: String::new(),
            newline: "\\\n".into(),
            comment_char: '#',
            echo_flag: String::new(),
            err_flag: String::new(),
        };
        let mut name: Option<String> = None;
        let mut path: Option<String> = None;
        let mut full_spec = false;

        for word in &words {
            let Some((key, value)) = word.split_once('=') else {
                return Err(MakeError::Shell(format!("Unknown keyword \"{word}\"")));
            };
            let value = value.to_string();
            match key {
                "name" => {
                    name = Some(value);
                    continue;
                }
                "path" => {
                    path = Some(value);
                    continue;
                }
                "quiet" => custom.echo_off = value,
                "echo" => custom.echo_on = value,
                "filter" => custom.no_print = value,
                "echoFlag" => custom.echo_flag = value,
                "errFlag" => custom.err_flag = value,
                "hasErrCtl" => {
                    custom.has_err_ctl = matches!(value.chars().next(), Some('Y' | 'y' | 'T' | 't'))
                }
                "newline" => custom.newline = value,
                "check" => {
                    custom.err_on = value.clone();
                    custom.echo_tmpl = value;
                }
                "ignore" => {
                    custom.err_off = value.clone();
                    custom.run_ign_tmpl = value;
                }
                "errout" => custom.run_chk_tmpl = value,
                "comment" => custom.comment_char = value.chars().next().unwrap_or('#'),
                _ => return Err(MakeError::Shell(format!("Unknown keyword \"{word}\""))),
            }
            full_spec = true;
        }

        let mut shell = match (path, full_spec) {
            (None, _) => {
                let name = name
                    .ok_or_else(|| MakeError::Shell("Neither path nor name specified".into()))?;
                Self::builtin(&name)
                    .ok_or_else(|| MakeError::Shell(format!("{name}: No matching shell")))?
            }
            (Some(path), false) => {
                let base = path.rsplit('/').next().unwrap_or(&path).to_string();
                let name = name.unwrap_or(base);
                let mut shell = Self::builtin(&name)
                    .ok_or_else(|| MakeError::Shell(format!("{name}: No matching shell")))?;
                shell.path = path;
                shell
            }
            (Some(path), true) => {
                let base = path.rsplit('/').next().unwrap_or(&path).to_string();
                custom.name = name.unwrap_or(base);
                custom.path = path;
                custom
            }
        };

        if !shell.echo_on.is_empty() && !shell.echo_off.is_empty() {
            shell.has_echo_ctl = true;
        }
        if !shell.has_err_ctl && shell.run_ign_tmpl.is_empty() {
            shell.run_ign_tmpl = "%s\n".into();
        }
        tracing::debug!(shell = %shell.name, path = %shell.path, "shell selected");
        Ok(shell)
    }
}

/// Substitute the first `%s` in a command template.
pub fn fill_template(template: &str, arg: &str) -> String {
    match template.find("%s") {
        Some(pos) => format!("{}{}{}", &template[..pos], arg, &template[pos + 2..]),
        None => template.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_lookup_by_name() {
        assert_eq!(Shell::builtin("ksh").unwrap().echo_on, "set -v");
        assert!(Shell::builtin("zsh").is_none());
        assert_eq!(Shell::default().name, "sh");
    }

    #[test]
    fn sh_uses_the_check_wrapper() {
        let sh = Shell::sh();
        assert!(!sh.has_err_ctl);
        assert_eq!(fill_template(&sh.run_chk_tmpl, "false"), "{ false \n} || exit $?\n");
    }

    #[test]
    fn spec_with_name_selects_builtin() {
        let shell = Shell::parse_spec("name=csh").unwrap();
        assert_eq!(shell, Shell::csh());
    }

    #[test]
    fn spec_with_path_only_uses_basename() {
        let shell = Shell::parse_spec("path=/usr/local/bin/ksh").unwrap();
        assert_eq!(shell.name, "ksh");
        assert_eq!(shell.path, "/usr/local/bin/ksh");
        assert!(shell.has_echo_ctl);
    }

    #[test]
    fn full_custom_spec() {
        let shell = Shell::parse_spec(
            r#"name=bash path=/bin/bash hasErrCtl=true check="set -e" ignore="set +e" "quiet=set +v" "echo=set -v" "filter=set +v" echoFlag=v errFlag=e newline="'\n'""#,
        )
        .unwrap();
        assert_eq!(shell.name, "bash");
        assert!(shell.has_err_ctl);
        assert!(shell.has_echo_ctl);
        assert_eq!(shell.err_on, "set -e");
        assert_eq!(shell.err_off, "set +e");
        assert_eq!(shell.no_print, "set +v");
        assert_eq!(shell.err_flag_arg().as_deref(), Some("-e"));
    }

    #[test]
    fn unknown_keyword_is_rejected() {
        let err = Shell::parse_spec("name=sh colour=blue").unwrap_err();
        assert!(err.to_string().contains("Unknown keyword"));
    }

    #[test]
    fn missing_name_and_path_is_rejected() {
        assert!(Shell::parse_spec("").is_err());
        assert!(Shell::parse_spec("name=fish").is_err());
    }

    #[test]
    fn script_args_merge_flags_without_dashes() {
        let csh = Shell::csh();
        assert_eq!(csh.script_args(true, false), vec!["-ev"]);
        assert_eq!(csh.script_args(false, true), Vec::<String>::new());
        assert_eq!(Shell::sh().script_args(true, false), Vec::<String>::new());
    }

    #[test]
    fn script_args_keep_dashed_flags_apart() {
        let mut shell = Shell::sh();
        shell.err_flag = "-e".into();
        shell.echo_flag = "-v".into();
        assert_eq!(shell.script_args(true, false), vec!["-e", "-v"]);
    }

    #[test]
    fn template_without_placeholder_is_unchanged() {
        assert_eq!(fill_template("set -e", "x"), "set -e");
    }
}
