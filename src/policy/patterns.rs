/// Match an identifier against a policy pattern.
///
/// - `*`, empty or missing: anything
/// - `prefix:*`: `prefix:...` or exactly `prefix`
/// - `prefix*`: any string starting with `prefix`
/// - otherwise: exact match
pub fn matches_pattern(pattern: Option<&str>, value: &str) -> bool {
    let pattern = match pattern.map(str::trim) {
        None | Some("") | Some("*") => return true,
        Some(p) => p,
    };

    if let Some(namespace) = pattern.strip_suffix(":*") {
        return value == namespace
            || value
                .strip_prefix(namespace)
                .is_some_and(|rest| rest.starts_with(':'));
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return value.starts_with(prefix);
    }
    pattern == value
}
