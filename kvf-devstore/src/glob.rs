//! Redis-style glob matching for `KEYS`: `*`, `?`, `[abc]`, `[^a-z]`, and
//! `\` escapes, over raw bytes.

/// Iterative matcher: on a mismatch it resumes from the last `*`, so work is
/// bounded by pattern length times key length and the stack stays flat.
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Pattern index just past the last `*`, and the text index it resumes at.
    let mut resume: Option<(usize, usize)> = None;

    while t < text.len() {
        if pattern.get(p) == Some(&b'*') {
            while pattern.get(p) == Some(&b'*') {
                p += 1;
            }
            resume = Some((p, t));
            continue;
        }
        if let Some(next) = match_one(pattern, p, text[t]) {
            p = next;
            t += 1;
            continue;
        }
        match resume {
            Some((star_p, star_t)) => {
                p = star_p;
                t = star_t + 1;
                resume = Some((star_p, t));
            }
            None => return false,
        }
    }

    pattern[p..].iter().all(|&b| b == b'*')
}

/// Matches one byte against the token at `p`, returning the next token index.
fn match_one(pattern: &[u8], p: usize, ch: u8) -> Option<usize> {
    match *pattern.get(p)? {
        b'?' => Some(p + 1),
        b'\\' if p + 1 < pattern.len() => (pattern[p + 1] == ch).then_some(p + 2),
        b'[' => match pattern[p + 1..].iter().position(|&b| b == b']') {
            None => (ch == b'[').then_some(p + 1),
            Some(end) => class_match(&pattern[p + 1..p + 1 + end], ch).then_some(p + end + 2),
        },
        literal => (literal == ch).then_some(p + 1),
    }
}

fn class_match(class: &[u8], ch: u8) -> bool {
    let (negate, class) = match class.first() {
        Some(b'^') => (true, &class[1..]),
        _ => (false, class),
    };

    let mut idx = 0;
    let mut hit = false;
    while idx < class.len() {
        if idx + 2 < class.len() && class[idx + 1] == b'-' {
            let (lo, hi) = (class[idx].min(class[idx + 2]), class[idx].max(class[idx + 2]));
            hit |= (lo..=hi).contains(&ch);
            idx += 3;
        } else {
            hit |= class[idx] == ch;
            idx += 1;
        }
    }
    hit != negate
}
