//! Context windows around requested line numbers.

/// Marker appended when the output was cut short.
pub const TRUNCATION_MARKER: &str = "...truncated...";

/// Shape of the snippet output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnippetLimits {
    /// Lines shown before and after each requested line.
    pub context: usize,
    /// Hard cap on output lines, marker included.
    pub max_lines: usize,
}

impl Default for SnippetLimits {
    fn default() -> Self {
        Self {
            context: 2,
            max_lines: 15,
        }
    }
}

/// Render `lineno: text` entries for each requested (1-based) line number.
///
/// Windows are emitted in request order and may overlap. Line numbers outside
/// the file contribute only the part of their window that exists. When the
/// windows would produce more than `max_lines` entries, the output keeps
/// `max_lines - 1` entries followed by [`TRUNCATION_MARKER`].
pub fn render_snippet(lines: &[&str], line_numbers: &[i64], limits: SnippetLimits) -> Vec<String> {
    let len = lines.len() as i64;
    let context = limits.context as i64;
    let mut numbers = line_numbers
        .iter()
        .flat_map(|&ln| ln.saturating_sub(context).max(1)..=ln.saturating_add(context).min(len))
        .peekable();

    let mut out = Vec::new();
    while let Some(number) = numbers.next() {
        if out.len() + 1 >= limits.max_lines && numbers.peek().is_some() {
            out.push(TRUNCATION_MARKER.to_string());
            return out;
        }
        let text = lines[(number - 1) as usize].trim_end();
        out.push(format!("{number}: {text}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("line {i}")).collect()
    }

    fn render(n: usize, line_numbers: &[i64]) -> Vec<String> {
        let owned = file(n);
        let lines: Vec<&str> = owned.iter().map(String::as_str).collect();
        render_snippet(&lines, line_numbers, SnippetLimits::default())
    }

    #[test]
    fn window_is_two_before_and_two_after() {
        let out = render(20, &[10]);
        assert_eq!(
            out,
            vec![
                "8: line 8",
                "9: line 9",
                "10: line 10",
                "11: line 11",
                "12: line 12"
            ]
        );
    }

    #[test]
    fn window_clamps_at_file_edges() {
        assert_eq!(render(3, &[1]), vec!["1: line 1", "2: line 2", "3: line 3"]);
        assert_eq!(render(3, &[3]), vec!["1: line 1", "2: line 2", "3: line 3"]);
        assert!(render(3, &[50]).is_empty());
    }

    #[test]
    fn exactly_fifteen_lines_has_no_marker() {
        let out = render(100, &[10, 20, 30]);
        assert_eq!(out.len(), 15);
        assert!(!out.contains(&TRUNCATION_MARKER.to_string()));
    }

    #[test]
    fn overflow_is_capped_with_marker() {
        let out = render(100, &[10, 20, 30, 40]);
        assert_eq!(out.len(), 15);
        assert_eq!(out.last().map(String::as_str), Some(TRUNCATION_MARKER));
        assert_eq!(out[13], "31: line 31");
    }

    #[test]
    fn never_exceeds_cap_with_many_requests() {
        let requested: Vec<i64> = (1..200).collect();
        let out = render(200, &requested);
        assert_eq!(out.len(), 15);
    }
}
