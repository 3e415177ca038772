//! Splitting the model's final answer into analysis and instruction.
//!
//! The preferred form is `<analysis>…</analysis>` and `<instruction>…</instruction>`.
//! Markdown headings (`## Analysis`, `## Instruction`) are accepted as a
//! fallback. Text with neither structure is returned whole in both fields.

use once_cell::sync::Lazy;
use regex::Regex;

#[allow(clippy::expect_used)]
static ANALYSIS_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<analysis>\s*(.*?)\s*</analysis>").expect("analysis tag pattern is valid")
});

#[allow(clippy::expect_used)]
static INSTRUCTION_TAG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<instructions?>\s*(.*?)\s*</instructions?>")
        .expect("instruction tag pattern is valid")
});

#[allow(clippy::expect_used)]
static SECTION_HEADING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?im)^[ \t]{0,3}#{1,6}[ \t]*(analysis|instructions?)[ \t]*:?[ \t]*$")
        .expect("section heading pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalOutput {
    pub analysis: String,
    pub instruction: String,
    /// False when neither tags nor headings were found
    pub structured: bool,
}

pub fn parse_final_output(text: &str) -> FinalOutput {
    if let Some(output) = parse_tags(text) {
        return output;
    }
    if let Some(output) = parse_headings(text) {
        return output;
    }

    let raw = text.trim().to_owned();
    FinalOutput {
        analysis: raw.clone(),
        instruction: raw,
        structured: false,
    }
}

fn capture(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().trim().to_owned())
}

fn parse_tags(text: &str) -> Option<FinalOutput> {
    let analysis = capture(&ANALYSIS_TAG, text);
    let instruction = capture(&INSTRUCTION_TAG, text);
    if analysis.is_none() && instruction.is_none() {
        return None;
    }
    Some(FinalOutput {
        analysis: analysis.unwrap_or_default(),
        instruction: instruction.unwrap_or_default(),
        structured: true,
    })
}

fn parse_headings(text: &str) -> Option<FinalOutput> {
    let headings: Vec<_> = SECTION_HEADING.captures_iter(text).collect();
    if headings.is_empty() {
        return None;
    }

    let mut analysis = None;
    let mut instruction = None;
    for (index, captures) in headings.iter().enumerate() {
        let (Some(heading), Some(kind)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let end = headings
            .get(index + 1)
            .and_then(|next| next.get(0))
            .map_or(text.len(), |next| next.start());
        let body = text[heading.end()..end].trim().to_owned();

        let slot = if kind.as_str().eq_ignore_ascii_case("analysis") {
            &mut analysis
        } else {
            &mut instruction
        };
        if slot.is_none() {
            *slot = Some(body);
        }
    }

    Some(FinalOutput {
        analysis: analysis.unwrap_or_default(),
        instruction: instruction.unwrap_or_default(),
        structured: true,
    })
}
