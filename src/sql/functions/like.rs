//! The SQL LIKE matcher.
//!
//! `%` matches any (possibly empty) byte sequence, `_` matches exactly one
//! byte, and the escape character forces the following pattern byte to match
//! literally. Matching is over raw bytes, recursing only at `%` boundaries.

/// Does `input` match `pattern`?
pub fn like(input: &[u8], pattern: &[u8], escape: u8) -> bool {
    let (mut s, mut p) = (input, pattern);

    while !p.is_empty() && !s.is_empty() {
        if p[0] == escape {
            // The next pattern byte must match exactly, whatever it is.
            p = &p[1..];
            if p.is_empty() || p[0] != s[0] {
                return false;
            }
            s = &s[1..];
            p = &p[1..];
        } else if p[0] == b'%' {
            // Collapse runs of wildcards: every extra '%' is redundant and
            // each '_' blindly consumes one input byte.
            p = &p[1..];
            while !p.is_empty() {
                if p[0] == b'%' {
                    p = &p[1..];
                } else if p[0] == b'_' {
                    if s.is_empty() {
                        return false;
                    }
                    s = &s[1..];
                    p = &p[1..];
                } else {
                    break;
                }
            }
            // Trailing '%' accepts the rest of the input.
            if p.is_empty() {
                return true;
            }
            if p[0] == escape && p.len() < 2 {
                return false;
            }
            while !s.is_empty() {
                if like(s, p, escape) {
                    return true;
                }
                s = &s[1..];
            }
            return false;
        } else if p[0] == b'_' {
            s = &s[1..];
            p = &p[1..];
        } else if p[0] == s[0] {
            s = &s[1..];
            p = &p[1..];
        } else {
            return false;
        }
    }

    // Any remaining pattern must be all '%'.
    s.is_empty() && p.iter().all(|&b| b == b'%')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(s: &str, p: &str) -> bool {
        like(s.as_bytes(), p.as_bytes(), b'\\')
    }

    #[test]
    fn test_exact_match() {
        assert!(m("abc", "abc"));
        assert!(!m("abc", "abd"));
        assert!(!m("abc", "ab"));
        assert!(!m("ab", "abc"));
    }

    #[test]
    fn test_percent_wildcard() {
        assert!(m("abc", "a%"));
        assert!(m("abc", "%c"));
        assert!(m("abc", "%b%"));
        assert!(m("abc", "%"));
        assert!(m("", "%"));
        assert!(!m("abc", "a%d"));
    }

    #[test]
    fn test_underscore_wildcard() {
        assert!(m("abc", "a_c"));
        assert!(m("abc", "___"));
        assert!(!m("abc", "__"));
        assert!(!m("abc", "____"));
    }

    #[test]
    fn test_combined_wildcards() {
        assert!(m("database", "d%_se"));
        assert!(m("tellur", "t__l%"));
        assert!(!m("tellur", "t__x%"));
    }

    #[test]
    fn test_escape() {
        assert!(m("50%", "50\\%"));
        assert!(!m("505", "50\\%"));
        assert!(m("a_b", "a\\_b"));
        assert!(!m("axb", "a\\_b"));
    }
}
