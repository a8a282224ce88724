//! Lightweight markdown for assistant replies.
//!
//! Recognises fenced code blocks, headings (levels 1-3), rules, bullet and numbered items,
//! and two inline styles: `**bold**` and `` `code` ``. Inline styles do not nest. Anything
//! else is kept as plain text, so no input character is lost outside of markup delimiters.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inline {
    Text(String),
    Bold(String),
    Code(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Block {
    Code {
        language: Option<String>,
        content: String,
    },
    LineBreak,
    Heading {
        level: u8,
        content: Vec<Inline>,
    },
    Rule,
    Bullet(Vec<Inline>),
    Numbered {
        number: String,
        content: Vec<Inline>,
    },
    Paragraph(Vec<Inline>),
}

const FENCE: &str = "```";

enum Segment<'a> {
    Prose(&'a str),
    Code {
        language: &'a str,
        content: &'a str,
    },
}

pub fn parse(text: &str) -> Vec<Block> {
    let mut blocks = Vec::new();
    for segment in split_code_blocks(text) {
        match segment {
            Segment::Code { language, content } => {
                blocks.push(Block::Code {
                    language: (!language.is_empty()).then(|| language.to_string()),
                    content: content.to_string(),
                });
            }
            Segment::Prose(prose) => {
                blocks.extend(prose.split('\n').map(parse_line));
            }
        }
    }
    blocks
}

/// Splits on closed fences. The optional `\w*` language tag and the newline after it are part
/// of the opening fence; an unclosed fence is left in the prose.
fn split_code_blocks(text: &str) -> Vec<Segment<'_>> {
    let mut segments = Vec::new();
    let mut prose_start = 0;
    let mut search_from = 0;

    while let Some(offset) = text[search_from..].find(FENCE) {
        let open = search_from + offset;
        let after_fence = open + FENCE.len();

        let tag_len = text[after_fence..]
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .unwrap_or(text.len() - after_fence);
        let language = &text[after_fence..after_fence + tag_len];
        let mut body_start = after_fence + tag_len;
        if text[body_start..].starts_with('\n') {
            body_start += 1;
        }

        let Some(close_offset) = text[body_start..].find(FENCE) else {
            break;
        };
        let close = body_start + close_offset;

        if open > prose_start {
            segments.push(Segment::Prose(&text[prose_start..open]));
        }
        let content = &text[body_start..close];
        segments.push(Segment::Code {
            language,
            content: content.strip_suffix('\n').unwrap_or(content),
        });

        prose_start = close + FENCE.len();
        search_from = prose_start;
    }

    if prose_start < text.len() {
        segments.push(Segment::Prose(&text[prose_start..]));
    }
    segments
}

fn parse_line(line: &str) -> Block {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Block::LineBreak;
    }

    for (level, marker) in [(3u8, "### "), (2, "## "), (1, "# ")] {
        if let Some(rest) = trimmed.strip_prefix(marker) {
            return Block::Heading { level, content: parse_inline(rest) };
        }
    }

    if is_rule(trimmed) {
        return Block::Rule;
    }

    if let Some(rest) = bullet_content(trimmed) {
        return Block::Bullet(parse_inline(rest));
    }

    if let Some((number, rest)) = numbered_item(trimmed) {
        return Block::Numbered { number: number.to_string(), content: parse_inline(rest) };
    }

    Block::Paragraph(parse_inline(line))
}

fn is_rule(trimmed: &str) -> bool {
    trimmed.len() >= 3 && (trimmed.bytes().all(|b| b == b'-') || trimmed.bytes().all(|b| b == b'*'))
}

/// `*` or `-` followed by one whitespace character.
fn bullet_content(trimmed: &str) -> Option<&str> {
    let mut chars = trimmed.char_indices();
    match (chars.next(), chars.next()) {
        (Some((_, '*' | '-')), Some((idx, ws))) if ws.is_whitespace() => {
            Some(&trimmed[idx + ws.len_utf8()..])
        }
        _ => None,
    }
}

/// `<digits>.` then one whitespace character then at least one more character.
fn numbered_item(trimmed: &str) -> Option<(&str, &str)> {
    let digits = trimmed.find(|c: char| !c.is_ascii_digit())?;
    if digits == 0 {
        return None;
    }
    let rest = trimmed[digits..].strip_prefix('.')?;
    let ws = rest.chars().next().filter(|c| c.is_whitespace())?;
    let content = &rest[ws.len_utf8()..];
    if content.is_empty() {
        return None;
    }
    Some((&trimmed[..digits], content))
}

/// Leftmost scan; at any position bold is tried before code.
pub fn parse_inline(line: &str) -> Vec<Inline> {
    let mut nodes = Vec::new();
    let mut plain_start = 0;
    let mut pos = 0;

    while pos < line.len() {
        let rest = &line[pos..];
        if let Some((node, consumed)) = match_bold(rest).or_else(|| match_code(rest)) {
            if pos > plain_start {
                nodes.push(Inline::Text(line[plain_start..pos].to_string()));
            }
            nodes.push(node);
            pos += consumed;
            plain_start = pos;
            continue;
        }
        pos += rest.chars().next().map(char::len_utf8).unwrap_or(1);
    }

    if plain_start < line.len() {
        nodes.push(Inline::Text(line[plain_start..].to_string()));
    }
    if nodes.is_empty() {
        nodes.push(Inline::Text(line.to_string()));
    }
    nodes
}

fn match_bold(rest: &str) -> Option<(Inline, usize)> {
    let inner = rest.strip_prefix("**")?;
    let first = inner.chars().next()?;
    let close = inner[first.len_utf8()..].find("**")? + first.len_utf8();
    Some((Inline::Bold(inner[..close].to_string()), close + 4))
}

fn match_code(rest: &str) -> Option<(Inline, usize)> {
    let inner = rest.strip_prefix('`')?;
    let close = inner.find('`')?;
    if close == 0 {
        return None;
    }
    Some((Inline::Code(inner[..close].to_string()), close + 2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Inline {
        Inline::Text(s.into())
    }

    #[test]
    fn plain_text_is_a_single_paragraph() {
        let input = "Just a sentence, with punctuation: nothing else!";
        assert_eq!(parse(input), vec![Block::Paragraph(vec![text(input)])]);
    }

    #[test]
    fn bold_code_and_plain_runs_keep_their_order() {
        assert_eq!(
            parse("**a** `b` c"),
            vec![
                Block::Paragraph(
                    vec![Inline::Bold("a".into()), text(" "), Inline::Code("b".into()), text(" c")]
                )
            ]
        );
    }

    #[test]
    fn classifies_lines() {
        let input = "# Title\n## Sub\n### Small\n---\n* star\n- dash\n12. twelve\n\n  indented";
        assert_eq!(parse(input), vec![
            Block::Heading { level: 1, content: vec![text("Title")] },
            Block::Heading { level: 2, content: vec![text("Sub")] },
            Block::Heading { level: 3, content: vec![text("Small")] },
            Block::Rule,
            Block::Bullet(vec![text("star")]),
            Block::Bullet(vec![text("dash")]),
            Block::Numbered { number: "12".into(), content: vec![text("twelve")] },
            Block::LineBreak,
            Block::Paragraph(vec![text("  indented")])
        ]);
    }

    #[test]
    fn near_misses_stay_paragraphs() {
        for line in ["#NoSpace", "--", "*-*", "1.", "1.x", "-dash", "**"] {
            assert_eq!(parse(line), vec![Block::Paragraph(vec![text(line)])], "line: {}", line);
        }
        assert_eq!(parse("***"), vec![Block::Rule]);
        assert_eq!(parse(" ----- "), vec![Block::Rule]);
    }

    #[test]
    fn extracts_fenced_code() {
        let input = "Run this:\n```rust\nfn main() {}\n```\nDone";
        assert_eq!(parse(input), vec![
            Block::Paragraph(vec![text("Run this:")]),
            Block::LineBreak,
            Block::Code { language: Some("rust".into()), content: "fn main() {}".into() },
            Block::LineBreak,
            Block::Paragraph(vec![text("Done")])
        ]);
    }

    #[test]
    fn code_blocks_keep_inner_markup_and_indentation() {
        let input = "```\n  **not bold**\n# not heading```";
        assert_eq!(parse(input), vec![Block::Code {
            language: None,
            content: "  **not bold**\n# not heading".into(),
        }]);
    }

    #[test]
    fn unclosed_fence_is_prose() {
        assert_eq!(parse("```js\nlet x"), vec![
            Block::Paragraph(vec![text("```js")]),
            Block::Paragraph(vec![text("let x")])
        ]);
    }

    #[test]
    fn inline_matching_is_lazy_and_leftmost() {
        assert_eq!(parse_inline("**a** and **b**"), vec![
            Inline::Bold("a".into()),
            text(" and "),
            Inline::Bold("b".into())
        ]);
        assert_eq!(parse_inline("``x`"), vec![text("`"), Inline::Code("x".into())]);
        assert_eq!(parse_inline("`**x**`"), vec![Inline::Code("**x**".into())]);
        assert_eq!(parse_inline("***a**"), vec![Inline::Bold("*a".into())]);
    }

    #[test]
    fn unicode_content_is_preserved() {
        assert_eq!(parse_inline("Pris: **300 kr.** pr. time ✓"), vec![
            text("Pris: "),
            Inline::Bold("300 kr.".into()),
            text(" pr. time ✓")
        ]);
        assert_eq!(parse("-\u{3000}punkt"), vec![Block::Bullet(vec![text("punkt")])]);
    }

    #[test]
    fn never_loses_characters_outside_delimiters() {
        let inputs = ["a ** b", "`", "x`y", "** **", "1. **bold** `c` rest", "é**ü**"];
        for input in inputs {
            let rebuilt: String = parse_inline(input)
                .into_iter()
                .map(|node| match node {
                    Inline::Text(t) => t,
                    Inline::Bold(b) => format!("**{}**", b),
                    Inline::Code(c) => format!("`{}`", c),
                })
                .collect();
            assert_eq!(rebuilt, input);
        }
    }
}
