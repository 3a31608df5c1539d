/// Matches `name` against a DOS-style wildcard pattern (`*` and `?`), ignoring ASCII case.
pub fn wildcard_match(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();
    let name: Vec<char> = name.chars().map(|c| c.to_ascii_lowercase()).collect();

    let (mut p, mut n) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while n < name.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some(&c) if c == '?' || c == name[n] => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    n = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '*')
}

/// True when the last component of `path` matches any of `patterns`.
pub fn is_in_path<S: AsRef<str>>(path: &str, patterns: &[S]) -> bool {
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    patterns.iter().any(|pattern| wildcard_match(pattern.as_ref(), name))
}
