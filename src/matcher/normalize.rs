//! Instruction normalization.

/// An instruction in the two forms matching needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    /// Trimmed, whitespace collapsed, case preserved.
    ///
    /// Built-in patterns match this case-insensitively so quoted
    /// literals keep the case they were authored in.
    pub collapsed: String,

    /// `collapsed`, case-folded. Knowledge-base triggers are compared against this.
    pub folded: String,
}

/// Trim, collapse whitespace runs, and case-fold.
pub fn normalize(text: &str) -> Normalized {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let folded = collapsed.to_lowercase();
    Normalized { collapsed, folded }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_and_folds() {
        let n = normalize("  Click \t 'Sign  In'\n");
        assert_eq!(n.collapsed, "Click 'Sign In'");
        assert_eq!(n.folded, "click 'sign in'");
    }

    #[test]
    fn empty_stays_empty() {
        let n = normalize("   ");
        assert_eq!(n.collapsed, "");
        assert_eq!(n.folded, "");
    }
}
