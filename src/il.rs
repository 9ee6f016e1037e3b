/// Line prefix carrying the per-build module version id in disassembler output.
pub const MVID_PREFIX: &str = "// MVID:";

/// Lines of `il` that do not start with any of `ignored_prefixes`.
pub fn filtered_lines<'a>(il: &'a str, ignored_prefixes: &'a [String]) -> impl Iterator<Item = &'a str> {
    il.lines()
        .filter(move |line| !ignored_prefixes.iter().any(|p| line.starts_with(p.as_str())))
}

/// Two IL texts are equal when their filtered line sequences match exactly.
pub fn il_equal(old: &str, new: &str, ignored_prefixes: &[String]) -> bool {
    filtered_lines(old, ignored_prefixes).eq(filtered_lines(new, ignored_prefixes))
}

pub fn filtered_text(il: &str, ignored_prefixes: &[String]) -> String {
    let mut out = String::with_capacity(il.len());
    for line in filtered_lines(il, ignored_prefixes) {
        out.push_str(line);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mvid() -> Vec<String> {
        vec![MVID_PREFIX.to_string()]
    }

    #[test]
    fn mvid_lines_are_ignored() {
        let old = ".assembly A\n// MVID: {1111}\n.method foo\n";
        let new = ".assembly A\n// MVID: {2222}\n.method foo\n";
        assert!(il_equal(old, new, &mvid()));
        assert!(!il_equal(old, new, &[]));
    }

    #[test]
    fn order_matters() {
        let old = ".method a\n.method b\n";
        let new = ".method b\n.method a\n";
        assert!(!il_equal(old, new, &mvid()));
    }

    #[test]
    fn line_endings_do_not_matter() {
        assert!(il_equal(".a\r\n.b\r\n", ".a\n.b", &mvid()));
    }

    #[test]
    fn filtered_text_drops_marker_lines() {
        let text = filtered_text("x\n// MVID: {1}\ny\n", &mvid());
        assert_eq!(text, "x\ny\n");
    }
}
