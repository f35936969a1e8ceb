//! Prompts for the two OCR passes.

/// Recognition pass: page image in, faithful Markdown out.
pub const OCR_PROMPT: &str = r#"You will receive an image of a textbook page.

Transcribe the page with high accuracy, keeping the original language, and
return it as readable Markdown that preserves the page structure. Embed every
formula as LaTeX inside the running text.

Rules:
1. Output the complete text. Do not summarise, omit, add or rewrite anything.
2. Restore the structure: headings, paragraphs, subheadings and lists.
3. Inline formulas use $...$. Display formulas go on their own lines as:
$$
...
$$
4. Stay literal: do not reorder words, fill gaps, or normalise formulas.
5. Output the Markdown only, with no preamble or explanation."#;

/// Formatting pass: raw OCR text in, cleaned Markdown out.
pub const FORMAT_PROMPT: &str = r#"You normalise text and LaTeX formatting. You receive the output of an OCR
model and perform a final formatting check and cleanup.

Rules:
1. Never change the original wording, word order or mathematical symbols.
   Your job is formatting only.
2. Remove any text that is not part of the original page, such as
   "Here is the recognised text".
3. LaTeX:
   - Display formulas use `$$...$$` on their own lines.
   - Inline formulas use `$...$`.
   - Fix common LaTeX mistakes such as unbalanced braces or misspelled commands.
4. Output clean, complete Markdown with no commentary.

Output the processed Markdown directly, with no preamble."#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompts_demand_markdown_only() {
        assert!(OCR_PROMPT.contains("Markdown only"));
        assert!(FORMAT_PROMPT.contains("formatting only"));
        assert!(OCR_PROMPT.contains("$$"));
    }
}
