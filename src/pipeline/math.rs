//! Math-notation rewriting: Jupyter/MathJax markdown → esa-style math.
//!
//! Jupyter renders `$…$` and `$$…$$` with MathJax before markdown sees the
//! text. esa.io runs its markdown renderer first, so backslashes, underscores
//! and asterisks inside inline math get eaten as markdown escapes/emphasis.
//! Display math is moved into a `` ```math `` block (which the markdown
//! renderer leaves alone); inline math is escaped so it survives.
//!
//! The rewrite is a one-shot transform. Running it over already rewritten
//! text escapes the escapes again.

/// Characters that need their escaping backslash doubled (rule c).
const ESCAPED_PUNCTUATION: &[char] = &['_', ',', '!', '#', '%', '&', '{', '}'];

/// Line-oriented rewriter; the only state is "inside display math" plus
/// "inside a fenced code block" (whose lines are never touched).
#[derive(Debug, Default)]
pub struct MathRewriter {
    in_display: bool,
    fence: CodeFence,
}

/// Tracks fenced code blocks across a sequence of lines.
#[derive(Debug, Default)]
pub struct CodeFence {
    open: Option<String>,
}

impl CodeFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next line. Returns `true` when the line is a fence line or
    /// lies inside a fenced block.
    pub fn update(&mut self, line: &str) -> bool {
        let trimmed = line.trim();
        if let Some(open) = &self.open {
            if trimmed.starts_with(open.as_str())
                && trimmed.trim_start_matches(open.as_str()).trim().is_empty()
            {
                self.open = None;
            }
            return true;
        }
        if let Some(marker) = fence_marker(trimmed) {
            self.open = Some(marker);
            return true;
        }
        false
    }

    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }
}

impl MathRewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewrite a whole cell / file worth of lines with fresh state.
    pub fn rewrite_lines<S: AsRef<str>>(lines: &[S]) -> Vec<String> {
        let mut rewriter = Self::new();
        let mut out: Vec<String> = lines
            .iter()
            .flat_map(|line| rewriter.rewrite_line(line.as_ref()))
            .collect();
        out.extend(rewriter.finish());
        out
    }

    /// Close a display block left open at the end of the input.
    pub fn finish(&mut self) -> Option<String> {
        if self.in_display {
            self.in_display = false;
            Some("```".to_string())
        } else {
            None
        }
    }

    /// `true` while between an opening and a closing `$$`.
    pub fn in_display_math(&self) -> bool {
        self.in_display
    }

    /// Rewrite one line; a single-line `$$…$$` expands to three lines.
    pub fn rewrite_line(&mut self, line: &str) -> Vec<String> {
        let trimmed = line.trim();

        if !self.in_display && self.fence.update(line) {
            return vec![line.to_string()];
        }

        // Rule 1: a lone `$$` toggles display math.
        if trimmed == "$$" {
            self.in_display = !self.in_display;
            return vec![if self.in_display { "```math" } else { "```" }.to_string()];
        }

        // Rule 2: display math passes through verbatim.
        if self.in_display {
            return vec![line.to_string()];
        }

        if let Some(inner) = single_line_display(trimmed) {
            return vec!["```math".to_string(), inner.to_string(), "```".to_string()];
        }

        // Rule 3: escape inline math segments.
        vec![rewrite_inline(line)]
    }
}

/// Opening code fence (three or more backticks / tildes) at line start.
fn fence_marker(trimmed: &str) -> Option<String> {
    for ch in ['`', '~'] {
        let run = trimmed.chars().take_while(|c| *c == ch).count();
        if run >= 3 {
            return Some(ch.to_string().repeat(run));
        }
    }
    None
}

/// `$$ x $$` on one line → `x`.
fn single_line_display(trimmed: &str) -> Option<&str> {
    let inner = trimmed.strip_prefix("$$")?.strip_suffix("$$")?;
    if inner.trim().is_empty() || inner.contains('$') {
        return None;
    }
    Some(inner.trim())
}

/// Split on `$` and escape the segments strictly between delimiter pairs.
///
/// An unmatched trailing `$` leaves the rest of the line alone.
pub fn rewrite_inline(line: &str) -> String {
    if !line.contains('$') {
        return line.to_string();
    }
    let segments: Vec<&str> = line.split('$').collect();
    let last = segments.len() - 1;
    segments
        .iter()
        .enumerate()
        .map(|(i, seg)| {
            if i % 2 == 1 && i < last {
                escape_inline_math(seg)
            } else {
                seg.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("$")
}

/// Escape the body of one inline-math span.
///
/// Rules, highest priority first:
/// * (a) `\\` → `\\\\`
/// * (b) `\` + whitespace → `\\` + whitespace
/// * (c) `\` + one of `_ , ! # % & { }` → `\\` + char
/// * (d) `*` → `\ast `
/// * (e) `'` not after `^` → `^{\prime}` (a run of n primes → n `\prime`s)
/// * (f) `_` → `\_`
///
/// Any other backslash sequence (`\alpha`, `\*`) is copied untouched.
pub fn escape_inline_math(segment: &str) -> String {
    let chars: Vec<char> = segment.chars().collect();
    let mut out = String::with_capacity(segment.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => match chars.get(i + 1) {
                Some('\\') => {
                    out.push_str(r"\\\\");
                    i += 2;
                }
                Some(&next) if next.is_whitespace() || ESCAPED_PUNCTUATION.contains(&next) => {
                    out.push_str(r"\\");
                    out.push(next);
                    i += 2;
                }
                Some(&next) => {
                    out.push('\\');
                    out.push(next);
                    i += 2;
                }
                None => {
                    out.push('\\');
                    i += 1;
                }
            },
            '*' => {
                out.push_str(r"\ast ");
                i += 1;
            }
            '\'' => {
                let run = chars[i..].iter().take_while(|c| **c == '\'').count();
                if i > 0 && chars[i - 1] == '^' {
                    out.extend(std::iter::repeat_n('\'', run));
                } else {
                    out.push_str("^{");
                    for _ in 0..run {
                        out.push_str(r"\prime");
                    }
                    out.push('}');
                }
                i += run;
            }
            '_' => {
                out.push_str(r"\_");
                i += 1;
            }
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_without_math_are_unchanged() {
        let lines = [
            "# Heading",
            "plain snake_case text with *emphasis*",
            "a \\ b",
            "",
        ];
        assert_eq!(MathRewriter::rewrite_lines(&lines), lines.to_vec());
    }

    #[test]
    fn display_block_becomes_math_fence() {
        let lines = ["before", "$$", "a_b * c", "$$", "after $x_1$"];
        assert_eq!(
            MathRewriter::rewrite_lines(&lines),
            vec!["before", "```math", "a_b * c", "```", r"after $x\_1$"]
        );
    }

    #[test]
    fn display_state_is_tracked() {
        let mut rw = MathRewriter::new();
        rw.rewrite_line("$$");
        assert!(rw.in_display_math());
        rw.rewrite_line("  $$  ");
        assert!(!rw.in_display_math());
    }

    #[test]
    fn single_line_display_expands() {
        assert_eq!(
            MathRewriter::rewrite_lines(&["$$ E = mc^2 $$"]),
            vec!["```math", "E = mc^2", "```"]
        );
    }

    #[test]
    fn code_fences_are_left_alone() {
        let lines = ["```python", "x = '$a_b$'", "$$", "```", "$a_b$"];
        assert_eq!(
            MathRewriter::rewrite_lines(&lines),
            vec!["```python", "x = '$a_b$'", "$$", "```", r"$a\_b$"]
        );
    }

    #[test]
    fn unclosed_display_block_is_closed_at_the_end() {
        assert_eq!(
            MathRewriter::rewrite_lines(&["$$", "a_b"]),
            vec!["```math", "a_b", "```"]
        );
        let mut rw = MathRewriter::new();
        rw.rewrite_line("$$");
        assert_eq!(rw.finish().as_deref(), Some("```"));
        assert!(!rw.in_display_math());
        assert_eq!(rw.finish(), None);
    }

    #[test]
    fn code_fence_tracks_nested_backticks() {
        let mut fence = CodeFence::new();
        assert!(!fence.update("text"));
        assert!(fence.update("````markdown"));
        assert!(fence.update("```"));
        assert!(fence.is_open());
        assert!(fence.update("````"));
        assert!(!fence.is_open());
        assert!(!fence.update("after"));
    }

    #[test]
    fn rule_a_doubles_line_breaks() {
        assert_eq!(escape_inline_math(r"a \\ b"), r"a \\\\ b");
    }

    #[test]
    fn rule_b_protects_explicit_space() {
        assert_eq!(escape_inline_math(r"a\ b"), r"a\\ b");
    }

    #[test]
    fn rule_c_escapes_punctuation() {
        assert_eq!(escape_inline_math(r"\{x\}\,\!\#\%\&\_"), r"\\{x\\}\\,\\!\\#\\%\\&\\_");
    }

    #[test]
    fn rule_d_asterisk_becomes_ast() {
        assert_eq!(escape_inline_math("a*b"), r"a\ast b");
    }

    #[test]
    fn rule_e_primes() {
        assert_eq!(escape_inline_math("f'(x)"), r"f^{\prime}(x)");
        assert_eq!(escape_inline_math("f''"), r"f^{\prime\prime}");
        assert_eq!(escape_inline_math("f^'"), "f^'");
    }

    #[test]
    fn rule_f_bare_underscore() {
        assert_eq!(escape_inline_math("x_i"), r"x\_i");
    }

    #[test]
    fn commands_are_untouched() {
        assert_eq!(escape_inline_math(r"\alpha + \beta"), r"\alpha + \beta");
    }

    #[test]
    fn only_paired_segments_are_escaped() {
        assert_eq!(rewrite_inline("a_b $x_1$ c_d $y_2$"), r"a_b $x\_1$ c_d $y\_2$");
        assert_eq!(rewrite_inline("cost: $5 per item_x"), "cost: $5 per item_x");
    }

    #[test]
    fn rewriting_twice_double_escapes() {
        let once = rewrite_inline("$a_b$");
        let twice = rewrite_inline(&once);
        assert_eq!(once, r"$a\_b$");
        assert_eq!(twice, r"$a\\_b$");
    }
}
