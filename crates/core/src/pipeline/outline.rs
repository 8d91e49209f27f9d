/// Splits an outline into chapter titles: one title per line that has
/// non-whitespace content, trimmed, in order. Pairs with the `outline` prompt,
/// which asks the model for exactly one title per line.
pub fn parse_chapter_titles(outline: &str) -> Vec<String> {
    outline
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}
