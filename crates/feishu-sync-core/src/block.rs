//! Typed model of the docx block tree.
//!
//! Mirrors the wire shape of the documents API: a block carries a numeric
//! `block_type` and exactly one matching payload field. Only the subset the
//! codec converts is modeled; unknown payloads survive fetch → render as
//! empty output rather than failing.

use serde::{Deserialize, Serialize};

/// Server-side document category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Doc,
    #[default]
    Docx,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Doc => "doc",
            FileType::Docx => "docx",
        }
    }
}

impl std::str::FromStr for FileType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        match s {
            "doc" => Ok(FileType::Doc),
            "docx" => Ok(FileType::Docx),
            _ => Err(()),
        }
    }
}

/// Numeric block categories used by the documents API.
pub mod block_type {
    pub const PAGE: i32 = 1;
    pub const TEXT: i32 = 2;
    pub const HEADING1: i32 = 3;
    pub const HEADING9: i32 = 11;
    pub const BULLET: i32 = 12;
    pub const ORDERED: i32 = 13;
    pub const CODE: i32 = 14;
    pub const QUOTE: i32 = 15;
    pub const TODO: i32 = 17;
    pub const DIVIDER: i32 = 22;
    pub const TABLE: i32 = 31;
    pub const TABLE_CELL: i32 = 32;

    /// Heading block type for a markdown level, clamped to the API's range.
    pub fn heading(level: u32) -> i32 {
        HEADING1 + (level.clamp(1, 9) as i32 - 1)
    }
}

/// A styled run of text.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TextRun {
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_element_style: Option<TextElementStyle>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TextElementStyle {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub bold: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub italic: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub inline_code: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<Link>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Link {
    pub url: String,
}

/// One inline element; only text runs are modeled.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TextElement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_run: Option<TextRun>,
}

/// Paragraph-level payload shared by text, headings, list items, code,
/// quote, and todo blocks.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TextBody {
    #[serde(default)]
    pub elements: Vec<TextElement>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<TextStyle>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TextStyle {
    /// Code fence language.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Todo checked state.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub done: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TableProperty {
    pub row_size: u32,
    pub column_size: u32,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub header_row: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct TableBody {
    pub property: TableProperty,
    /// Cell block ids, row-major. Allocated by the server on creation.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cells: Vec<String>,
}

/// Marker payload for blocks without content.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EmptyBody {}

/// A single block as fetched from or sent to the documents API.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Block {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub block_id: String,
    pub block_type: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Child block ids, in document order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<TextBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading1: Option<TextBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading2: Option<TextBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading3: Option<TextBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading4: Option<TextBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading5: Option<TextBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading6: Option<TextBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading7: Option<TextBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading8: Option<TextBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading9: Option<TextBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bullet: Option<TextBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ordered: Option<TextBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<TextBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quote: Option<TextBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub todo: Option<TextBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub divider: Option<EmptyBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<TableBody>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_cell: Option<EmptyBody>,
}

impl Block {
    fn with_body(block_type: i32, body: TextBody) -> Self {
        let mut block = Block {
            block_type,
            ..Default::default()
        };
        let slot = match block_type {
            block_type::TEXT => &mut block.text,
            block_type::HEADING1 => &mut block.heading1,
            4 => &mut block.heading2,
            5 => &mut block.heading3,
            6 => &mut block.heading4,
            7 => &mut block.heading5,
            8 => &mut block.heading6,
            9 => &mut block.heading7,
            10 => &mut block.heading8,
            block_type::HEADING9 => &mut block.heading9,
            block_type::BULLET => &mut block.bullet,
            block_type::ORDERED => &mut block.ordered,
            block_type::CODE => &mut block.code,
            block_type::QUOTE => &mut block.quote,
            block_type::TODO => &mut block.todo,
            _ => &mut block.text,
        };
        *slot = Some(body);
        block
    }

    pub fn paragraph(elements: Vec<TextElement>) -> Self {
        Self::with_body(block_type::TEXT, TextBody { elements, style: None })
    }

    pub fn heading(level: u32, elements: Vec<TextElement>) -> Self {
        Self::with_body(block_type::heading(level), TextBody { elements, style: None })
    }

    pub fn bullet(elements: Vec<TextElement>) -> Self {
        Self::with_body(block_type::BULLET, TextBody { elements, style: None })
    }

    pub fn ordered(elements: Vec<TextElement>) -> Self {
        Self::with_body(block_type::ORDERED, TextBody { elements, style: None })
    }

    pub fn code(language: Option<String>, elements: Vec<TextElement>) -> Self {
        Self::with_body(
            block_type::CODE,
            TextBody {
                elements,
                style: Some(TextStyle { language, done: None }),
            },
        )
    }

    pub fn quote(elements: Vec<TextElement>) -> Self {
        Self::with_body(block_type::QUOTE, TextBody { elements, style: None })
    }

    pub fn todo(done: bool, elements: Vec<TextElement>) -> Self {
        Self::with_body(
            block_type::TODO,
            TextBody {
                elements,
                style: Some(TextStyle { language: None, done: Some(done) }),
            },
        )
    }

    pub fn divider() -> Self {
        Block {
            block_type: block_type::DIVIDER,
            divider: Some(EmptyBody {}),
            ..Default::default()
        }
    }

    pub fn table(rows: u32, columns: u32, header_row: bool) -> Self {
        Block {
            block_type: block_type::TABLE,
            table: Some(TableBody {
                property: TableProperty {
                    row_size: rows,
                    column_size: columns,
                    header_row,
                },
                cells: Vec::new(),
            }),
            ..Default::default()
        }
    }

    /// The paragraph payload of this block, whichever field carries it.
    pub fn body(&self) -> Option<&TextBody> {
        match self.block_type {
            block_type::TEXT | block_type::PAGE => self.text.as_ref(),
            block_type::HEADING1 => self.heading1.as_ref(),
            4 => self.heading2.as_ref(),
            5 => self.heading3.as_ref(),
            6 => self.heading4.as_ref(),
            7 => self.heading5.as_ref(),
            8 => self.heading6.as_ref(),
            9 => self.heading7.as_ref(),
            10 => self.heading8.as_ref(),
            block_type::HEADING9 => self.heading9.as_ref(),
            block_type::BULLET => self.bullet.as_ref(),
            block_type::ORDERED => self.ordered.as_ref(),
            block_type::CODE => self.code.as_ref(),
            block_type::QUOTE => self.quote.as_ref(),
            block_type::TODO => self.todo.as_ref(),
            _ => None,
        }
    }

    /// Markdown heading level, if this is a heading block.
    pub fn heading_level(&self) -> Option<u32> {
        if (block_type::HEADING1..=block_type::HEADING9).contains(&self.block_type) {
            Some((self.block_type - block_type::HEADING1) as u32 + 1)
        } else {
            None
        }
    }
}

/// A block awaiting upload, with content the API only accepts in a second
/// step. Table cells get their ids on creation, so the cell text rides
/// alongside until the skeleton exists.
#[derive(Debug, Clone, PartialEq)]
pub struct DraftBlock {
    pub block: Block,
    /// Row-major cell markdown for table drafts.
    pub table_rows: Option<Vec<Vec<String>>>,
}

impl DraftBlock {
    pub fn new(block: Block) -> Self {
        Self {
            block,
            table_rows: None,
        }
    }

    pub fn table(rows: Vec<Vec<String>>, header_row: bool) -> Self {
        let row_size = rows.len() as u32;
        let column_size = rows.iter().map(|r| r.len()).max().unwrap_or(0) as u32;
        Self {
            block: Block::table(row_size, column_size, header_row),
            table_rows: Some(rows),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heading_type_mapping() {
        assert_eq!(block_type::heading(1), block_type::HEADING1);
        assert_eq!(block_type::heading(6), 8);
        assert_eq!(block_type::heading(9), block_type::HEADING9);
        assert_eq!(block_type::heading(12), block_type::HEADING9);
    }

    #[test]
    fn test_heading_level_roundtrip() {
        for level in 1..=9 {
            let block = Block::heading(level, vec![]);
            assert_eq!(block.heading_level(), Some(level));
        }
        assert_eq!(Block::paragraph(vec![]).heading_level(), None);
    }

    #[test]
    fn test_body_follows_type() {
        let block = Block::bullet(vec![TextElement {
            text_run: Some(TextRun {
                content: "item".into(),
                text_element_style: None,
            }),
        }]);
        let body = block.body().unwrap();
        assert_eq!(body.elements[0].text_run.as_ref().unwrap().content, "item");
        assert!(block.text.is_none());
    }

    #[test]
    fn test_serialization_omits_empty_fields() {
        let json = serde_json::to_string(&Block::paragraph(vec![])).unwrap();
        assert!(!json.contains("heading1"));
        assert!(!json.contains("block_id"));
        assert!(json.contains("\"block_type\":2"));
    }

    #[test]
    fn test_file_type_wire_form() {
        assert_eq!(serde_json::to_string(&FileType::Docx).unwrap(), "\"docx\"");
        assert_eq!(
            serde_json::from_str::<FileType>("\"doc\"").unwrap(),
            FileType::Doc
        );
    }

    #[test]
    fn test_draft_table_dimensions() {
        let draft = DraftBlock::table(
            vec![
                vec!["a".into(), "b".into()],
                vec!["c".into(), "d".into()],
                vec!["e".into(), "f".into()],
            ],
            true,
        );
        let table = draft.block.table.as_ref().unwrap();
        assert_eq!(table.property.row_size, 3);
        assert_eq!(table.property.column_size, 2);
        assert!(table.property.header_row);
    }
}
