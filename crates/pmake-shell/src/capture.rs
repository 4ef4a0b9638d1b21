//! Running a command through the shell and capturing its output.
//!
//! Used by the `:!cmd!`, `:sh` and `::!=` modifiers.

use std::process::{Command, Stdio};

use crate::shell::Shell;

/// What a shell capture produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    /// Standard output with one trailing newline removed and every other
    /// newline turned into a space.
    pub output: String,
    /// Set when the command could not be run, exited nonzero, or died on a
    /// signal. The output is still usable.
    pub error: Option<String>,
}

/// Run `cmd` with `shell -c`, capturing stdout. Stdin and stderr are inherited.
pub fn capture(shell: &Shell, cmd: &str, env: &[(String, String)]) -> Capture {
    tracing::debug!(shell = %shell.path, cmd, "capturing shell output");
    let result = Command::new(&shell.path)
        .arg("-c")
        .arg(cmd)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::inherit())
        .stderr(Stdio::inherit())
        .stdout(Stdio::piped())
        .output();

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            return Capture {
                output: String::new(),
                error: Some(format!("Couldn't exec \"{cmd}\": {e}")),
            }
        }
    };

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    if text.ends_with('\n') {
        text.pop();
    }
    let text = text.replace('\n', " ");

    let error = if output.status.success() {
        None
    } else if output.status.code().is_none() {
        Some(format!("\"{cmd}\" exited on a signal"))
    } else {
        Some(format!("\"{cmd}\" returned non-zero status"))
    };

    Capture {
        output: text,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newlines_become_spaces() {
        let cap = capture(&Shell::sh(), "printf 'a\\nb\\nc\\n'", &[]);
        assert_eq!(cap.output, "a b c");
        assert!(cap.error.is_none());
    }

    #[test]
    fn only_one_trailing_newline_is_stripped() {
        let cap = capture(&Shell::sh(), "printf 'x\\n\\n'", &[]);
        assert_eq!(cap.output, "x ");
    }

    #[test]
    fn nonzero_status_is_reported_with_output() {
        let cap = capture(&Shell::sh(), "echo partial; exit 3", &[]);
        assert_eq!(cap.output, "partial");
        assert_eq!(
            cap.error.as_deref(),
            Some("\"echo partial; exit 3\" returned non-zero status")
        );
    }

    #[test]
    fn environment_is_passed() {
        let env = vec![("PMAKE_CAPTURE_TEST".to_string(), "hello".to_string())];
        let cap = capture(&Shell::sh(), "echo $PMAKE_CAPTURE_TEST", &env);
        assert_eq!(cap.output, "hello");
    }

    #[test]
    fn missing_shell_is_an_error() {
        let mut shell = Shell::sh();
        shell.path = "/nonexistent/shell".into();
        let cap = capture(&shell, "true", &[]);
        assert!(cap.output.is_empty());
        assert!(cap.error.unwrap().starts_with("Couldn't exec"));
    }
}
