/// Checks if a host matches a glob pattern
///
/// `*` matches any run of characters (including none) and `?` matches exactly
/// one character. Everything else is compared literally.
///
/// # Examples
///
/// ```
/// use gleaner::url::matches_glob;
///
/// assert!(matches_glob("*", "example.com"));
/// assert!(matches_glob("*.example.com", "blog.example.com"));
/// assert!(matches_glob("example.*", "example.org"));
/// assert!(!matches_glob("*.example.com", "example.org"));
/// ```
pub fn matches_glob(pattern: &str, candidate: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let candidate: Vec<char> = candidate.chars().collect();

    let (mut p, mut c) = (0, 0);
    // Position of the last `*` seen and the candidate index it was matched against
    let mut backtrack: Option<(usize, usize)> = None;

    while c < candidate.len() {
        match pattern.get(p) {
            Some('*') => {
                backtrack = Some((p, c));
                p += 1;
            }
            Some('?') => {
                p += 1;
                c += 1;
            }
            Some(ch) if *ch == candidate[c] => {
                p += 1;
                c += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    c = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|ch| *ch == '*')
}
