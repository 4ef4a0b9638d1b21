//! Turning recipe lines into job-script bytes.

use crate::shell::{fill_template, Shell};

/// Per-command prefixes: `@` (silent), `-` (ignore errors), `+` (always run).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandFlags {
    pub echo: bool,
    pub ignore_errors: bool,
    pub always: bool,
}

impl CommandFlags {
    /// Strip the prefix characters (and any whitespace between them) from
    /// `cmd`, returning the flags they set and the remaining command text.
    ///
    /// `loud` keeps `@` commands echoed, for debugging.
    pub fn parse(cmd: &str, loud: bool) -> (Self, &str) {
        let mut flags = CommandFlags {
            echo: true,
            ignore_errors: false,
            always: false,
        };
        let mut rest = cmd;
        loop {
            let Some(c) = rest.chars().next() else { break };
            match c {
                '@' => flags.echo = loud,
                '-' => flags.ignore_errors = true,
                '+' => flags.always = true,
                c if c.is_whitespace() => {}
                _ => break,
            }
            rest = &rest[c.len_utf8()..];
        }
        (flags, rest.trim_start())
    }
}

/// Settings that apply to a whole job rather than one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobFlags {
    /// Commands are echoed unless the target is silent.
    pub echo: bool,
    /// The target ignores every failure.
    pub ignore_errors: bool,
    /// Commands are really executed (false under `-n`).
    pub run: bool,
    /// Emit `set -x` before the first command (shell debugging).
    pub trace: bool,
}

impl Default for JobFlags {
    fn default() -> Self {
        Self {
            echo: true,
            ignore_errors: false,
            run: true,
            trace: false,
        }
    }
}

/// Escape `"`, `$`, `` ` `` and `\` so `cmd` can be embedded in a double-quoted
/// `echo` without the shell interpreting it.
pub fn escape_dbl_quote(cmd: &str) -> String {
    let mut out = String::with_capacity(cmd.len() + 8);
    for c in cmd.chars() {
        if matches!(c, '"' | '$' | '`' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Accumulates the text of one job script.
pub struct ScriptWriter<'a> {
    shell: &'a Shell,
    out: String,
    traced: bool,
}

impl<'a> ScriptWriter<'a> {
    pub fn new(shell: &'a Shell) -> Self {
        Self {
            shell,
            out: String::new(),
            traced: false,
        }
    }

    fn write_line(&mut self, line: &str) {
        self.out.push_str(line);
        self.out.push('\n');
    }

    fn echo_off(&mut self) {
        if self.shell.has_echo_ctl {
            let line = self.shell.echo_off.clone();
            self.write_line(&line);
        }
    }

    fn echo_on(&mut self) {
        if self.shell.has_echo_ctl {
            let line = self.shell.echo_on.clone();
            self.write_line(&line);
        }
    }

    fn echo_cmd(&mut self, esc_cmd: &str) {
        let text = fill_template(&self.shell.echo_tmpl, esc_cmd);
        self.out.push_str(&text);
    }

    fn err_off(&mut self, echo: bool) {
        if echo {
            self.echo_off();
        }
        let line = self.shell.err_off.clone();
        self.write_line(&line);
        if echo {
            self.echo_on();
        }
    }

    fn err_on(&mut self, echo: bool) {
        if echo {
            self.echo_off();
        }
        let line = self.shell.err_on.clone();
        self.write_line(&line);
        if echo {
            self.echo_on();
        }
    }

    fn trace_on(&mut self) {
        if !self.traced {
            self.write_line("set -x");
            self.traced = true;
        }
    }

    /// Append one already-expanded recipe line, prefixes included.
    ///
    /// The strategy, in priority order: native echo and error control;
    /// the dialect's "run ignoring errors" template, echoing the command
    /// explicitly; the "run and check" wrapper (not used for blank or comment
    /// lines, which would make the wrapper malformed); or verbatim text.
    pub fn command(&mut self, job: &JobFlags, line: &str) {
        let shell = self.shell;
        let (mut flags, cmd) = CommandFlags::parse(line, false);
        flags.ignore_errors = flags.ignore_errors || job.ignore_errors;

        let mut run = job.run;
        if flags.always && !run {
            self.trace_on();
            run = true;
        }

        // Only the fallback paths echo the command themselves.
        let esc_cmd = if shell.has_err_ctl {
            String::new()
        } else {
            escape_dbl_quote(cmd)
        };

        if !flags.echo {
            if job.echo && run && shell.has_echo_ctl {
                self.echo_off();
            } else if shell.has_err_ctl {
                flags.echo = true;
            }
        }

        let mut template = "%s\n".to_string();
        if flags.ignore_errors {
            if !run {
                flags.ignore_errors = false;
            } else if shell.has_err_ctl {
                self.err_off(job.echo && flags.echo);
            } else if !shell.run_ign_tmpl.is_empty() {
                if job.echo && flags.echo {
                    self.echo_off();
                    self.echo_cmd(&esc_cmd);
                    flags.echo = false;
                }
                template = shell.run_ign_tmpl.clone();
                // The template ignores the status itself.
                flags.ignore_errors = false;
            } else {
                flags.ignore_errors = false;
            }
        } else if !shell.has_err_ctl && !shell.run_chk_tmpl.is_empty() {
            if job.echo && flags.echo {
                self.echo_off();
                self.echo_cmd(&esc_cmd);
                flags.echo = false;
            }
            let blank_or_comment =
                esc_cmd.is_empty() || esc_cmd.starts_with(shell.comment_char);
            template = if blank_or_comment {
                shell.run_ign_tmpl.clone()
            } else {
                shell.run_chk_tmpl.clone()
            };
        }

        if job.trace && shell.name == "sh" {
            self.trace_on();
        }

        let text = fill_template(&template, cmd);
        self.out.push_str(&text);

        if flags.ignore_errors {
            self.err_on(job.echo && flags.echo);
        }
        if !flags.echo {
            self.echo_on();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.out.is_empty()
    }

    pub fn finish(self) -> String {
        self.out
    }
}
