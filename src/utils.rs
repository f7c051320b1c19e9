use anyhow::{Context, Result};
use std::io::{self, Write};

/// Prompts on stdout and reads one line from stdin. Only an affirmative
/// answer returns true; anything else (including EOF) declines.
pub fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    io::stdout().flush().context("Failed to flush stdout")?;
    let mut answer = String::new();
    io::stdin()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(is_affirmative(&answer))
}

/// Exactly "y", case-insensitively. Only the line terminator is stripped,
/// so an answer with surrounding whitespace declines.
pub fn is_affirmative(answer: &str) -> bool {
    answer.trim_end_matches(['\r', '\n']).to_lowercase() == "y"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_y_is_affirmative() {
        assert!(is_affirmative("y"));
        assert!(is_affirmative("Y"));
        assert!(is_affirmative("y\n"));
        assert!(is_affirmative("Y\r\n"));
        assert!(!is_affirmative("yes"));
        assert!(!is_affirmative(""));
        assert!(!is_affirmative("n"));
        assert!(!is_affirmative(" y\n"));
        assert!(!is_affirmative("y y"));
    }
}
