//! Word-level helpers used by the modifiers.
//!
//! A value is split into words on whitespace, keeping quoted groups intact.
//! Per-word modifiers write their results into a [`SepBuf`], which inserts
//! the current separator between non-empty results only.

use pmake_shell::split_words;

/// Split a value into words. Quotes group words but are kept verbatim.
pub fn split(value: &str) -> Vec<String> {
    split_words(value, false).unwrap_or_else(|_| {
        value
            .split_ascii_whitespace()
            .map(str::to_string)
            .collect()
    })
}

/// An output buffer that separates words lazily.
#[derive(Debug, Default)]
pub struct SepBuf {
    buf: String,
    sep: Option<char>,
    need_sep: bool,
}

impl SepBuf {
    pub fn new(sep: Option<char>) -> Self {
        Self {
            buf: String::new(),
            sep,
            need_sep: false,
        }
    }

    pub fn push_str(&mut self, s: &str) {
        if s.is_empty() {
            return;
        }
        if self.need_sep {
            if let Some(sep) = self.sep {
                self.buf.push(sep);
                self.need_sep = false;
            }
        }
        self.buf.push_str(s);
    }

    /// Request a separator before the next non-empty text.
    pub fn mark_sep(&mut self) {
        self.need_sep = true;
    }

    pub fn cancel_sep(&mut self) {
        self.need_sep = false;
    }

    pub fn ends_with_newline(&self) -> bool {
        self.buf.ends_with('\n')
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn finish(self) -> String {
        self.buf
    }
}

/// Run `f` on each word of `value` (or on the whole value as one word) and
/// collect the results.
pub fn modify_words(
    value: &str,
    one_big_word: bool,
    sep: Option<char>,
    mut f: impl FnMut(&str, &mut SepBuf),
) -> String {
    let mut out = SepBuf::new(sep);
    if one_big_word {
        f(value, &mut out);
        return out.finish();
    }
    for word in split(value) {
        f(&word, &mut out);
        if !out.is_empty() {
            out.mark_sep();
        }
    }
    out.finish()
}

// ---------------------------------------------------------------------------
// Single-word transformations
// ---------------------------------------------------------------------------

/// `:H`, everything before the last `/`, or `.` if there is none.
pub fn head(word: &str) -> &str {
    match word.rfind('/') {
        Some(i) => &word[..i],
        None => ".",
    }
}

/// `:T`, everything after the last `/`.
pub fn tail(word: &str) -> &str {
    match word.rfind('/') {
        Some(i) => &word[i + 1..],
        None => word,
    }
}

/// `:E`, everything after the last `.`, or nothing.
pub fn suffix(word: &str) -> &str {
    match word.rfind('.') {
        Some(i) => &word[i + 1..],
        None => "",
    }
}

/// `:R`, everything before the last `.`.
pub fn root(word: &str) -> &str {
    match word.rfind('.') {
        Some(i) => &word[..i],
        None => word,
    }
}

/// Match a SysV `lhs` against `word`.
///
/// Without `%` in `lhs`, the word must end with `lhs` and the match is the
/// part before it. With `%`, the prefix before `%` must start the word, the
/// suffix after it must end the word, and the match is what `%` stands for.
/// Returns the match and whether `lhs` contained `%`.
pub fn sysv_match<'w>(word: &'w str, lhs: &str) -> Option<(&'w str, bool)> {
    let (prefix, suffix, percent) = match lhs.find('%') {
        Some(i) => (&lhs[..i], &lhs[i + 1..], true),
        None => ("", lhs, false),
    };
    if percent && word.is_empty() {
        return None;
    }
    let rest = word.strip_prefix(prefix)?;
    let matched = rest.strip_suffix(suffix)?;
    if percent {
        Some((matched, true))
    } else {
        // The whole text in front of the suffix, including any prefix.
        Some((&word[..word.len() - suffix.len()], false))
    }
}

/// Build the SysV replacement for one word given its match.
pub fn sysv_replace(matched: &str, lhs_percent: bool, rhs: &str, out: &mut SepBuf) {
    let percent = rhs.find('%');
    let mut rhs = rhs;
    if let (Some(i), true) = (percent, lhs_percent) {
        out.push_str(&rhs[..i]);
        rhs = &rhs[i + 1..];
    }
    if percent.is_some() || !lhs_percent {
        out.push_str(matched);
    }
    out.push_str(rhs);
}

// ---------------------------------------------------------------------------
// Whole-value transformations
// ---------------------------------------------------------------------------

/// Characters that `:Q` protects with a backslash.
const QUOTE_META: &str = "~#=|^(){};&<>*?[]:$`\\\"'";

/// `:Q` and `:q`. Newlines become the shell's newline sequence.
pub fn quote(value: &str, quote_dollar: bool, newline: &str) -> String {
    let mut out = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        if c == '\n' {
            out.push_str(newline);
            continue;
        }
        if c.is_ascii_whitespace() || QUOTE_META.contains(c) {
            out.push('\\');
        }
        out.push(c);
        if quote_dollar && c == '$' {
            out.push_str("\\$");
        }
    }
    out
}

/// `:hash`, a 32-bit MurmurHash3 variant rendered as 8 hex digits, least
/// significant nibble first.
pub fn hash(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut h: u32 = 0x971e_137b;
    let mut c1: u32 = 0x9554_3787;
    let mut c2: u32 = 0x2ad7_eb25;

    for chunk in bytes.chunks(4) {
        let mut k: u32 = 0;
        for (i, b) in chunk.iter().enumerate() {
            k |= u32::from(*b) << (8 * i);
        }
        c1 = c1.wrapping_mul(5).wrapping_add(0x7b7d_159c);
        c2 = c2.wrapping_mul(5).wrapping_add(0x6bce_6396);
        k = k.wrapping_mul(c1);
        k = k.rotate_left(11);
        k = k.wrapping_mul(c2);
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0x52dc_e729);
        h ^= k;
    }
    h ^= bytes.len() as u32;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;

    const HEX: &[u8; 16] = b"0123456789abcdef";
    (0..8)
        .map(|i| HEX[((h >> (4 * i)) & 0xf) as usize] as char)
        .collect()
}

/// `:u`, drop adjacent duplicates.
pub fn uniq(value: &str) -> String {
    let mut words = split(value);
    words.dedup();
    words.join(" ")
}

/// `:[first..last]`, 1-based and inclusive. Negative indexes count from the
/// end; a reversed range yields the words in reverse.
pub fn select_words(
    value: &str,
    first: i64,
    last: i64,
    sep: Option<char>,
    one_big_word: bool,
) -> String {
    let words = if one_big_word {
        vec![value.to_string()]
    } else {
        split(value)
    };
    let len = words.len() as i64;
    let first = if first < 0 { first + len + 1 } else { first };
    let last = if last < 0 { last + len + 1 } else { last };

    let mut out = SepBuf::new(sep);
    let mut emit = |i: i64| {
        if let Some(w) = usize::try_from(i).ok().and_then(|i| words.get(i)) {
            out.push_str(w);
            out.mark_sep();
        }
    };
    if first > last {
        let start = first.min(len) - 1;
        let end = if last < 1 { 0 } else { last - 1 };
        let mut i = start;
        while i >= end {
            emit(i);
            i -= 1;
        }
    } else {
        let start = if first < 1 { 0 } else { first - 1 };
        let end = last.min(len);
        for i in start..end {
            emit(i);
        }
    }
    out.finish()
}

/// Parse a leading integer the way `strtol` with base 0 does: optional
/// sign, then `0x` hex, leading-zero octal or decimal. Returns the value
/// and the unparsed rest, or `None` if no digits were found.
pub fn parse_c_int(s: &str) -> Option<(i64, &str)> {
    let bytes = s.as_bytes();
    let mut i = 0;
    let negative = match bytes.first() {
        Some(b'-') => {
            i += 1;
            true
        }
        Some(b'+') => {
            i += 1;
            false
        }
        _ => false,
    };
    let (radix, digits_start) = if bytes.get(i) == Some(&b'0')
        && matches!(bytes.get(i + 1), Some(b'x' | b'X'))
        && bytes.get(i + 2).is_some_and(u8::is_ascii_hexdigit)
    {
        (16, i + 2)
    } else if bytes.get(i) == Some(&b'0') {
        (8, i)
    } else {
        (10, i)
    };
    let mut end = digits_start;
    while end < bytes.len() && (bytes[end] as char).is_digit(radix) {
        end += 1;
    }
    if end == digits_start {
        return None;
    }
    let magnitude = i64::from_str_radix(&s[digits_start..end], radix).ok()?;
    Some((if negative { -magnitude } else { magnitude }, &s[end..]))
}

/// The numeric sort key for `:On`: a leading integer with an optional
/// `k`, `m` or `g` multiplier.
pub fn numeric_key(word: &str) -> i64 {
    let Some((n, rest)) = parse_c_int(word) else {
        return 0;
    };
    match rest.as_bytes().first() {
        Some(b'k' | b'K') => n << 10,
        Some(b'm' | b'M') => n << 20,
        Some(b'g' | b'G') => n << 30,
        _ => n,
    }
}
