//! Redis-style glob matching over raw bytes
//!
//! Shared by KEYS, the object store scan and the query `LIKE` operator.
//! Supported syntax: `*` (any run), `?` (one byte), `[abc]`, `[a-z]`,
//! `[^abc]` and `\x` to match a metacharacter literally.

/// Match `text` against `pattern`
///
/// Backtracks only to the most recent `*`, so the cost stays linear in
/// practice even for patterns like `*a*b*c`.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while t < text.len() {
        let step = match pattern.get(p) {
            Some(b'*') => {
                star = Some((p, t));
                p += 1;
                continue;
            }
            Some(b'?') => Some(1),
            Some(b'\\') if p + 1 < pattern.len() => {
                (pattern[p + 1] == text[t]).then_some(2)
            }
            Some(b'[') => match class_match(&pattern[p..], text[t]) {
                Some((true, consumed)) => Some(consumed),
                Some((false, _)) => None,
                // unterminated class: '[' is a literal
                None => (text[t] == b'[').then_some(1),
            },
            Some(c) => (*c == text[t]).then_some(1),
            None => None,
        };

        match step {
            Some(consumed) => {
                p += consumed;
                t += 1;
            }
            None => match star {
                Some((star_p, star_t)) => {
                    p = star_p + 1;
                    t = star_t + 1;
                    star = Some((star_p, star_t + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p.min(pattern.len())..].iter().all(|&c| c == b'*')
}

/// Match one byte against the class starting at `pattern[0] == b'['`
///
/// Returns whether it matched and how many pattern bytes the class spans,
/// or None when the class is never closed.
fn class_match(pattern: &[u8], byte: u8) -> Option<(bool, usize)> {
    let mut i = 1;
    let negate = pattern.get(i) == Some(&b'^');
    if negate {
        i += 1;
    }

    let mut matched = false;
    let mut first = true;
    while i < pattern.len() {
        let c = pattern[i];
        if c == b']' && !first {
            return Some((matched != negate, i + 1));
        }
        first = false;

        if c == b'\\' && i + 1 < pattern.len() {
            matched |= pattern[i + 1] == byte;
            i += 2;
        } else if i + 2 < pattern.len() && pattern[i + 1] == b'-' && pattern[i + 2] != b']' {
            let (lo, hi) = if c <= pattern[i + 2] {
                (c, pattern[i + 2])
            } else {
                (pattern[i + 2], c)
            };
            matched |= (lo..=hi).contains(&byte);
            i += 3;
        } else {
            matched |= c == byte;
            i += 1;
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_star_and_question() {
        assert!(glob_match(b"*", b""));
        assert!(glob_match(b"*", b"anything"));
        assert!(glob_match(b"user:*", b"user:42"));
        assert!(!glob_match(b"user:*", b"session:1"));
        assert!(glob_match(b"*:cache", b"data:cache"));
        assert!(glob_match(b"*admin*", b"user_admin_role"));
        assert!(glob_match(b"h?llo", b"hello"));
        assert!(!glob_match(b"h?llo", b"hllo"));
        assert!(glob_match(b"*a*b*c", b"xxaybzzc"));
        assert!(!glob_match(b"*a*b*c", b"xxaybzz"));
    }

    #[test]
    fn test_character_classes() {
        assert!(glob_match(b"h[ae]llo", b"hallo"));
        assert!(!glob_match(b"h[ae]llo", b"hillo"));
        assert!(glob_match(b"h[^e]llo", b"hallo"));
        assert!(!glob_match(b"h[^e]llo", b"hello"));
        assert!(glob_match(b"key[0-9]", b"key7"));
        assert!(!glob_match(b"key[0-9]", b"keyx"));
    }

    #[test]
    fn test_escapes_and_literals() {
        assert!(glob_match(b"a\\*b", b"a*b"));
        assert!(!glob_match(b"a\\*b", b"axb"));
        assert!(glob_match(b"exact", b"exact"));
        assert!(!glob_match(b"exact", b"exactly"));
        assert!(glob_match(b"a[b", b"a[b"));
    }
}
