//! Word splitting and the shell-bypass test.

use pmake_types::{MakeError, Result};

/// Characters that force a command through the shell.
///
/// `=` and `:` are included so that variable assignments and shell builtins
/// such as `:` are never exec'd directly. Quotes are included because direct
/// exec does not interpret them.
const SHELL_META: &[u8] = b"~#=|^(){};&<>*?[]:$`\\\n\"'";

/// Whether `cmd` needs a shell or can be exec'd directly.
pub fn needs_shell(cmd: &str) -> bool {
    cmd.bytes().any(|b| SHELL_META.contains(&b))
}

/// Split `line` into words, honouring single and double quotes.
///
/// With `expand`, quotes are removed and backslash escapes are processed;
/// without it the words keep their quoting verbatim. An unterminated quote is
/// an error.
pub fn split_words(line: &str, expand: bool) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut word = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' if quote.is_none() => {
                quote = Some(c);
                in_word = true;
                if !expand {
                    word.push(c);
                }
            }
            '"' | '\'' if quote == Some(c) => {
                quote = None;
                if !expand {
                    word.push(c);
                }
            }
            ' ' | '\t' | '\n' if quote.is_none() => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            '\\' if quote != Some('\'') => {
                in_word = true;
                let Some(next) = chars.next() else {
                    word.push('\\');
                    break;
                };
                if !expand {
                    word.push('\\');
                    word.push(next);
                    continue;
                }
                match next {
                    '\n' => {}
                    'b' => word.push('\u{8}'),
                    'f' => word.push('\u{c}'),
                    'n' => word.push('\n'),
                    'r' => word.push('\r'),
                    't' => word.push('\t'),
                    other => word.push(other),
                }
            }
            other => {
                in_word = true;
                word.push(other);
            }
        }
    }

    if let Some(q) = quote {
        return Err(MakeError::Fatal(format!(
            "unterminated quoted string [{}] in \"{}\"",
            q, line
        )));
    }
    if in_word {
        words.push(word);
    }
    Ok(words)
}
