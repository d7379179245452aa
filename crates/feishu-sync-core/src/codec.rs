//! Markdown ⇄ block-tree conversion.
//!
//! `blocks_to_markdown` renders a fetched block list deterministically;
//! `markdown_to_blocks` walks the pulldown-cmark event stream into draft
//! blocks ready for upload. Converting a document the engine previously
//! wrote preserves its semantics, though not necessarily its bytes.

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use std::collections::HashMap;

use crate::api::DocumentMeta;
use crate::block::{block_type, Block, DraftBlock, TextElement, TextElementStyle, TextRun};

/// Result of parsing a Markdown file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DraftDocument {
    /// First top-level heading, when the document starts with one.
    pub title: String,
    pub blocks: Vec<DraftBlock>,
}

// ---------------------------------------------------------------------------
// Blocks → Markdown
// ---------------------------------------------------------------------------

/// Render inline elements back to Markdown markers.
fn render_elements(elements: &[TextElement]) -> String {
    let mut out = String::new();
    for element in elements {
        let Some(run) = &element.text_run else { continue };
        let style = run.text_element_style.clone().unwrap_or_default();
        let mut piece = if style.inline_code {
            format!("`{}`", run.content)
        } else {
            let mut piece = run.content.clone();
            if style.bold && style.italic {
                piece = format!("***{piece}***");
            } else if style.bold {
                piece = format!("**{piece}**");
            } else if style.italic {
                piece = format!("*{piece}*");
            }
            piece
        };
        if let Some(link) = &style.link {
            piece = format!("[{piece}]({})", link.url);
        }
        out.push_str(&piece);
    }
    out
}

/// Unstyled text of a run of elements.
pub fn plain_text(elements: &[TextElement]) -> String {
    elements
        .iter()
        .filter_map(|e| e.text_run.as_ref())
        .map(|r| r.content.as_str())
        .collect()
}

fn render_table(block: &Block, by_id: &HashMap<&str, &Block>) -> String {
    let Some(table) = &block.table else { return String::new() };
    let columns = table.property.column_size as usize;
    if columns == 0 {
        return String::new();
    }

    let cell_text = |cell_id: &String| -> String {
        let Some(cell) = by_id.get(cell_id.as_str()) else {
            return String::new();
        };
        cell.children
            .iter()
            .filter_map(|child_id| by_id.get(child_id.as_str()))
            .filter_map(|child| child.body())
            .map(|body| render_elements(&body.elements))
            .collect::<Vec<_>>()
            .join(" ")
    };

    let mut lines = Vec::new();
    for (row_index, row) in table.cells.chunks(columns).enumerate() {
        let rendered: Vec<String> = row.iter().map(cell_text).collect();
        lines.push(format!("| {} |", rendered.join(" | ")));
        if row_index == 0 {
            lines.push(format!("|{}|", " --- |".repeat(columns)));
        }
    }
    lines.join("\n")
}

/// Render a fetched block list to Markdown.
///
/// Deterministic: identical input always yields identical output. A leading
/// `# <title>` is produced when the metadata has a title and the first body
/// block is not already that heading.
pub fn blocks_to_markdown(meta: &DocumentMeta, blocks: &[Block]) -> String {
    let by_id: HashMap<&str, &Block> =
        blocks.iter().map(|b| (b.block_id.as_str(), b)).collect();

    let top_level: Vec<&Block> = match blocks.iter().find(|b| b.block_type == block_type::PAGE) {
        Some(page) => page
            .children
            .iter()
            .filter_map(|id| by_id.get(id.as_str()).copied())
            .collect(),
        None => blocks.iter().collect(),
    };

    // (chunk, is_list_item): consecutive list items join with single newlines.
    let mut chunks: Vec<(String, bool)> = Vec::new();
    let mut ordered_index = 0u32;

    for block in &top_level {
        if block.block_type != block_type::ORDERED {
            ordered_index = 0;
        }
        let rendered = match block.block_type {
            block_type::TEXT => (render_elements(&block.body().map(|b| b.elements.clone()).unwrap_or_default()), false),
            t if (block_type::HEADING1..=block_type::HEADING9).contains(&t) => {
                let level = block.heading_level().unwrap_or(1).min(6) as usize;
                let body = block.body().map(|b| render_elements(&b.elements)).unwrap_or_default();
                (format!("{} {body}", "#".repeat(level)), false)
            }
            block_type::BULLET => {
                let body = block.body().map(|b| render_elements(&b.elements)).unwrap_or_default();
                (format!("- {body}"), true)
            }
            block_type::ORDERED => {
                ordered_index += 1;
                let body = block.body().map(|b| render_elements(&b.elements)).unwrap_or_default();
                (format!("{ordered_index}. {body}"), true)
            }
            block_type::TODO => {
                let body = block.body();
                let done = body
                    .and_then(|b| b.style.as_ref())
                    .and_then(|s| s.done)
                    .unwrap_or(false);
                let text = body.map(|b| render_elements(&b.elements)).unwrap_or_default();
                (format!("- [{}] {text}", if done { "x" } else { " " }), true)
            }
            block_type::CODE => {
                let body = block.body();
                let language = body
                    .and_then(|b| b.style.as_ref())
                    .and_then(|s| s.language.clone())
                    .unwrap_or_default();
                let content = body.map(|b| plain_text(&b.elements)).unwrap_or_default();
                (format!("```{language}\n{}\n```", content.trim_end_matches('\n')), false)
            }
            block_type::QUOTE => {
                let body = block.body().map(|b| render_elements(&b.elements)).unwrap_or_default();
                (format!("> {body}"), false)
            }
            block_type::DIVIDER => ("---".to_string(), false),
            block_type::TABLE => (render_table(block, &by_id), false),
            _ => (String::new(), false),
        };
        if !rendered.0.is_empty() {
            chunks.push(rendered);
        }
    }

    if !meta.title.is_empty() {
        let first_is_title = top_level
            .first()
            .filter(|b| b.heading_level() == Some(1))
            .and_then(|b| b.body())
            .map(|b| plain_text(&b.elements) == meta.title)
            .unwrap_or(false);
        if !first_is_title {
            chunks.insert(0, (format!("# {}", meta.title), false));
        }
    }

    let mut out = String::new();
    for (index, (chunk, is_list_item)) in chunks.iter().enumerate() {
        if index > 0 {
            let glue = if *is_list_item && chunks[index - 1].1 { "\n" } else { "\n\n" };
            out.push_str(glue);
        }
        out.push_str(chunk);
    }
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

// ---------------------------------------------------------------------------
// Markdown → Blocks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
enum Leaf {
    Paragraph,
    Heading(u32),
    Code,
    Item,
}

/// Walker state for one pass over the event stream.
struct MarkdownWalker {
    title: String,
    blocks: Vec<DraftBlock>,

    elements: Vec<TextElement>,
    bold: u32,
    italic: u32,
    link: Option<String>,
    leaf: Option<Leaf>,

    code_language: Option<String>,
    code_text: String,

    list_ordered: Vec<bool>,
    item_todo: Option<bool>,
    quote_depth: u32,

    in_table: bool,
    cell_buf: String,
    row: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl MarkdownWalker {
    fn new() -> Self {
        Self {
            title: String::new(),
            blocks: Vec::new(),
            elements: Vec::new(),
            bold: 0,
            italic: 0,
            link: None,
            leaf: None,
            code_language: None,
            code_text: String::new(),
            list_ordered: Vec::new(),
            item_todo: None,
            quote_depth: 0,
            in_table: false,
            cell_buf: String::new(),
            row: Vec::new(),
            rows: Vec::new(),
        }
    }

    fn push_text(&mut self, content: &str, inline_code: bool) {
        let style = TextElementStyle {
            bold: self.bold > 0,
            italic: self.italic > 0,
            inline_code,
            link: self.link.clone().map(|url| crate::block::Link { url }),
        };
        let style = if style == TextElementStyle::default() { None } else { Some(style) };
        self.elements.push(TextElement {
            text_run: Some(TextRun {
                content: content.to_string(),
                text_element_style: style,
            }),
        });
    }

    fn take_elements(&mut self) -> Vec<TextElement> {
        std::mem::take(&mut self.elements)
    }

    fn finish_leaf(&mut self, leaf: Leaf) {
        let elements = self.take_elements();
        let block = match leaf {
            Leaf::Heading(level) => {
                // The document's leading H1 becomes the title rather than a
                // body block.
                if level == 1
                    && self.title.is_empty()
                    && self.blocks.is_empty()
                    && self.quote_depth == 0
                    && self.list_ordered.is_empty()
                {
                    self.title = plain_text(&elements);
                    self.leaf = None;
                    return;
                }
                Block::heading(level, elements)
            }
            Leaf::Paragraph if self.quote_depth > 0 => Block::quote(elements),
            Leaf::Paragraph => Block::paragraph(elements),
            Leaf::Code => {
                let content = std::mem::take(&mut self.code_text);
                let content = content.trim_end_matches('\n').to_string();
                let elements = vec![TextElement {
                    text_run: Some(TextRun {
                        content,
                        text_element_style: None,
                    }),
                }];
                Block::code(self.code_language.take(), elements)
            }
            Leaf::Item => match self.item_todo.take() {
                Some(done) => Block::todo(done, elements),
                None if self.list_ordered.last().copied().unwrap_or(false) => {
                    Block::ordered(elements)
                }
                None => Block::bullet(elements),
            },
        };
        self.blocks.push(DraftBlock::new(block));
        self.leaf = None;
    }

    fn handle(&mut self, event: Event<'_>) {
        if self.in_table {
            self.handle_in_table(event);
            return;
        }
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                self.leaf = Some(Leaf::Heading(level as u32));
            }
            Event::End(TagEnd::Heading(_)) => {
                let level = match self.leaf {
                    Some(Leaf::Heading(level)) => level,
                    _ => 1,
                };
                self.finish_leaf(Leaf::Heading(level));
            }
            Event::Start(Tag::Paragraph) => {
                // Paragraphs inside list items feed the item's own leaf.
                if self.leaf != Some(Leaf::Item) {
                    self.leaf = Some(Leaf::Paragraph);
                }
            }
            Event::End(TagEnd::Paragraph) => {
                if self.leaf == Some(Leaf::Paragraph) {
                    self.finish_leaf(Leaf::Paragraph);
                }
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                self.code_language = match kind {
                    CodeBlockKind::Fenced(lang) if !lang.is_empty() => Some(lang.to_string()),
                    _ => None,
                };
                self.leaf = Some(Leaf::Code);
            }
            Event::End(TagEnd::CodeBlock) => self.finish_leaf(Leaf::Code),
            Event::Start(Tag::List(start)) => self.list_ordered.push(start.is_some()),
            Event::End(TagEnd::List(_)) => {
                self.list_ordered.pop();
            }
            Event::Start(Tag::Item) => {
                self.leaf = Some(Leaf::Item);
            }
            Event::End(TagEnd::Item) => {
                if self.leaf == Some(Leaf::Item) || !self.elements.is_empty() {
                    self.finish_leaf(Leaf::Item);
                }
            }
            Event::TaskListMarker(done) => self.item_todo = Some(done),
            Event::Start(Tag::BlockQuote(_)) => self.quote_depth += 1,
            Event::End(TagEnd::BlockQuote(_)) => self.quote_depth = self.quote_depth.saturating_sub(1),
            Event::Rule => self.blocks.push(DraftBlock::new(Block::divider())),
            Event::Start(Tag::Emphasis) => self.italic += 1,
            Event::End(TagEnd::Emphasis) => self.italic = self.italic.saturating_sub(1),
            Event::Start(Tag::Strong) => self.bold += 1,
            Event::End(TagEnd::Strong) => self.bold = self.bold.saturating_sub(1),
            Event::Start(Tag::Link { dest_url, .. }) => self.link = Some(dest_url.to_string()),
            Event::End(TagEnd::Link) => self.link = None,
            Event::Text(text) => {
                if self.leaf == Some(Leaf::Code) {
                    self.code_text.push_str(&text);
                } else {
                    self.push_text(&text, false);
                }
            }
            Event::Code(text) => self.push_text(&text, true),
            Event::SoftBreak => self.push_text(" ", false),
            Event::HardBreak => self.push_text(" ", false),
            Event::Start(Tag::Table(_)) => {
                self.in_table = true;
                self.rows.clear();
            }
            _ => {}
        }
    }

    /// Inside a table, inline events rebuild the cell's Markdown source.
    fn handle_in_table(&mut self, event: Event<'_>) {
        match event {
            Event::Start(Tag::TableHead) | Event::Start(Tag::TableRow) => self.row.clear(),
            Event::End(TagEnd::TableHead) | Event::End(TagEnd::TableRow) => {
                self.rows.push(std::mem::take(&mut self.row));
            }
            Event::Start(Tag::TableCell) => self.cell_buf.clear(),
            Event::End(TagEnd::TableCell) => {
                self.row.push(std::mem::take(&mut self.cell_buf));
            }
            Event::End(TagEnd::Table) => {
                self.in_table = false;
                let rows = std::mem::take(&mut self.rows);
                if !rows.is_empty() {
                    self.blocks.push(DraftBlock::table(rows, true));
                }
            }
            Event::Text(text) => self.cell_buf.push_str(&text),
            Event::Code(text) => {
                self.cell_buf.push('`');
                self.cell_buf.push_str(&text);
                self.cell_buf.push('`');
            }
            Event::Start(Tag::Strong) | Event::End(TagEnd::Strong) => self.cell_buf.push_str("**"),
            Event::Start(Tag::Emphasis) | Event::End(TagEnd::Emphasis) => self.cell_buf.push('*'),
            Event::Start(Tag::Link { .. }) => self.cell_buf.push('['),
            Event::End(TagEnd::Link) => self.cell_buf.push(']'),
            Event::SoftBreak | Event::HardBreak => self.cell_buf.push(' '),
            _ => {}
        }
    }
}

fn parser_options() -> Options {
    Options::ENABLE_TABLES | Options::ENABLE_TASKLISTS
}

/// Parse a Markdown document into draft blocks plus an extracted title.
pub fn markdown_to_blocks(markdown: &str) -> DraftDocument {
    let mut walker = MarkdownWalker::new();
    for event in Parser::new_ext(markdown, parser_options()) {
        walker.handle(event);
    }
    DraftDocument {
        title: walker.title,
        blocks: walker.blocks,
    }
}

/// Parse a single line of inline Markdown into text elements. Used to
/// populate table cells, whose content rides along as Markdown source.
pub fn inline_elements(markdown: &str) -> Vec<TextElement> {
    let mut walker = MarkdownWalker::new();
    for event in Parser::new_ext(markdown, parser_options()) {
        match event {
            Event::Start(Tag::Paragraph) | Event::End(TagEnd::Paragraph) => {}
            other => walker.handle(other),
        }
    }
    walker.take_elements()
}
