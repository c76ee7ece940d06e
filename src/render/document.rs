const DOCUMENT_CLASS: &str = r"\documentclass";
const BEGIN_DOCUMENT: &str = "\n\\begin{document}\n";
const END_DOCUMENT: &str = "\n\\end{document}";
const LATEX_FENCE: &str = "```latex";
const FENCE: &str = "```";

pub fn is_self_contained(expression: &str) -> bool {
    expression.contains(DOCUMENT_CLASS)
}

pub fn assemble(expression: &str, preamble: &str) -> String {
    if is_self_contained(expression) {
        return expression.to_string();
    }
    let mut document =
        String::with_capacity(preamble.len() + expression.len() + BEGIN_DOCUMENT.len() + 16);
    document.push_str(preamble);
    document.push_str(BEGIN_DOCUMENT);
    document.push_str(expression);
    document.push_str(END_DOCUMENT);
    document
}

pub fn extract_latex(message: &str) -> Option<String> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return None;
    }

    let fenced = trimmed
        .get(..LATEX_FENCE.len())
        .map(|head| head.eq_ignore_ascii_case(LATEX_FENCE))
        .unwrap_or(false);
    if fenced
        && trimmed.ends_with(FENCE)
        && trimmed.len() >= LATEX_FENCE.len() + FENCE.len()
    {
        let inner = trimmed[LATEX_FENCE.len()..trimmed.len() - FENCE.len()].trim();
        if inner.is_empty() {
            return None;
        }
        return Some(inner.to_string());
    }

    if has_latex_markers(trimmed) {
        Some(trimmed.to_string())
    } else {
        None
    }
}

fn has_latex_markers(text: &str) -> bool {
    text.contains(DOCUMENT_CLASS)
        || text.starts_with('$')
        || text.starts_with(r"\[")
        || text.starts_with(r"\(")
        || text.starts_with(r"\begin")
        || text.matches('$').count() >= 2
}
