use crate::Result;
use crate::expr;
use regex::Regex;
use std::sync::LazyLock;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\{\s*(.+?)\s*\}\}").expect("placeholder pattern is valid")
});

/// Whether the input contains at least one `${{ }}` placeholder.
pub fn has_placeholder(input: &str) -> bool {
    PLACEHOLDER.is_match(input)
}

/// Interpolate every `${{ expression }}` placeholder in a string.
///
/// Supports any expression of the expression language, e.g.
/// - `${{ vars.myset.item.region }}` - variable set value
/// - `${{ matrix.os }}` - matrix value
/// - `${{ needs.build.outputs.version }}` - dependency output
///
/// Missing values interpolate to the empty string. A malformed expression is
/// an error.
pub fn interpolate(input: &str, context: &serde_json::Value) -> Result<String> {
    let mut output = String::with_capacity(input.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(input) {
        let (Some(whole), Some(inner)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        output.push_str(&input[last..whole.start()]);
        let value = expr::evaluate(inner.as_str(), context)?;
        output.push_str(&expr::to_text(&value));
        last = whole.end();
    }

    output.push_str(&input[last..]);
    Ok(output)
}
