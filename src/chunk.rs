//! Heading- and paragraph-boundary text chunker.
//!
//! Splits a document into excerpts of at most `max_chars` characters.
//!
//! # Algorithm
//!
//! 1. If the document has level-2 or level-3 Markdown headings (`## `,
//!    `### `, or a tab after the hashes) outside fenced code blocks, cut it
//!    into sections at each heading. Text before the first
//!    heading is carried into the first section. Otherwise the whole
//!    document is one block.
//! 2. Split every block into blank-line-delimited paragraphs.
//! 3. Greedily pack consecutive paragraphs (joined by `\n\n`) until adding
//!    the next one would exceed `max_chars`, then start a new chunk.
//! 4. A paragraph that alone exceeds `max_chars` becomes its own chunk. It is
//!    never cut mid-sentence.
//!
//! Lengths are measured in characters, not bytes, so CJK notes get the same
//! budget as Latin ones.

/// Default chunk length in characters.
pub const DEFAULT_MAX_CHUNK_CHARS: usize = 1200;

/// Split `text` into chunk texts. Empty or whitespace-only documents yield
/// no chunks.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    let mut chunks = Vec::new();
    for block in split_sections(&normalized) {
        pack_paragraphs(&block, max_chars, &mut chunks);
    }
    chunks
}

/// `## ` or `### ` followed by a space or tab. Level 1 and level 4+
/// headings never cut.
fn is_section_heading(line: &str) -> bool {
    let rest = line
        .strip_prefix("###")
        .or_else(|| line.strip_prefix("##"));
    matches!(rest.and_then(|r| r.chars().next()), Some(' ' | '\t'))
}

fn is_fence(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("```") || trimmed.starts_with("~~~")
}

/// Cut at level-2/3 headings outside fenced code blocks. The preamble stays
/// attached to the first section.
fn split_sections(text: &str) -> Vec<String> {
    let mut sections: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut seen_heading = false;
    let mut in_fence = false;

    for line in text.lines() {
        if is_fence(line) {
            in_fence = !in_fence;
        } else if !in_fence && is_section_heading(line) {
            if seen_heading && !current.trim().is_empty() {
                sections.push(std::mem::take(&mut current));
            }
            seen_heading = true;
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current);
    }
    sections
}

fn split_paragraphs(block: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in block.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                paragraphs.push(current.join("\n").trim().to_string());
                current.clear();
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        paragraphs.push(current.join("\n").trim().to_string());
    }
    paragraphs
}

fn pack_paragraphs(block: &str, max_chars: usize, out: &mut Vec<String>) {
    let mut buf = String::new();
    let mut buf_chars = 0usize;

    for para in split_paragraphs(block) {
        let para_chars = para.chars().count();

        let would_be = if buf.is_empty() {
            para_chars
        } else {
            buf_chars + 2 + para_chars
        };

        if would_be > max_chars && !buf.is_empty() {
            out.push(std::mem::take(&mut buf));
            buf_chars = 0;
        }

        // Oversized paragraphs pass through whole
        if para_chars > max_chars {
            out.push(para);
            continue;
        }

        if !buf.is_empty() {
            buf.push_str("\n\n");
            buf_chars += 2;
        }
        buf.push_str(&para);
        buf_chars += para_chars;
    }

    if !buf.is_empty() {
        out.push(buf);
    }
}
