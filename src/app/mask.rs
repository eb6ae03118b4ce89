/// Number of leading and trailing characters left visible by [`mask_secret`].
pub const VISIBLE_CHARS: usize = 4;

/// Renders a secret-bearing string for logs, keeping only the first and last
/// [`VISIBLE_CHARS`] characters. Secrets too short to hide anything are fully
/// masked.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= VISIBLE_CHARS * 2 {
        return "*".repeat(chars.len());
    }

    let head: String = chars[..VISIBLE_CHARS].iter().collect();
    let tail: String = chars[chars.len() - VISIBLE_CHARS..].iter().collect();
    format!(
        "{head}{}{tail}",
        "*".repeat(chars.len() - VISIBLE_CHARS * 2)
    )
}
