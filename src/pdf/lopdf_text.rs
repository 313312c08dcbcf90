//! lopdf-backed page text provider.
//!
//! Text runs are placed back on a character grid from their positions on the
//! page, so line breaks and the blank gutters between table columns survive
//! extraction.

use super::{ReportDocument, TextProvider};
use crate::error::{ExtractError, ExtractResult};
use lopdf::content::Operation;
use lopdf::{Document, Object, ObjectId};
use std::collections::BTreeMap;
use std::io::Cursor;
use tracing::{debug, warn};

/// Fragments whose baselines are this close (points) share a line.
const LINE_TOLERANCE: f32 = 2.0;

/// Page width (points) of one grid column.
const GRID_WIDTH: f32 = 4.0;

/// Estimated glyph advance, in ems.
const GLYPH_ADVANCE: f32 = 0.5;

/// Gaps below this many ems join fragments without a space.
const JOIN_GAP: f32 = 0.15;

/// Gaps below this many ems are an ordinary word space.
const WORD_GAP: f32 = 1.0;

/// Blank grid columns kept between fragments that are further apart.
const COLUMN_GAP: usize = 2;

/// TJ adjustments (thousandths of an em) below this read as a space.
const TJ_SPACE: f32 = -200.0;

pub struct LopdfProvider;

impl TextProvider for LopdfProvider {
    fn name(&self) -> &str {
        "lopdf"
    }

    fn pages(&self, filename: &str, data: &[u8]) -> ExtractResult<ReportDocument> {
        let doc = Document::load_from(Cursor::new(data))
            .map_err(|e| ExtractError::Pdf(format!("failed to load {}: {}", filename, e)))?;

        let mut pages = Vec::new();
        for (page_num, page_id) in doc.get_pages() {
            match page_fragments(&doc, page_id) {
                Ok(fragments) => pages.push(layout_page(fragments)),
                Err(e) => {
                    // Keep page numbering stable for the locator.
                    warn!("{}: no text on page {}: {}", filename, page_num, e);
                    pages.push(String::new());
                }
            }
        }

        debug!("{}: extracted {} pages", filename, pages.len());
        Ok(ReportDocument::new(pages))
    }
}

/// Affine transform `[a b c d e f]` in PDF row-vector convention.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f32; 6]);

impl Matrix {
    const IDENTITY: Matrix = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);

    fn translate(tx: f32, ty: f32) -> Self {
        Matrix([1.0, 0.0, 0.0, 1.0, tx, ty])
    }

    fn from_operands(operands: &[Object]) -> Option<Self> {
        if operands.len() < 6 {
            return None;
        }
        let mut m = [0.0; 6];
        for (slot, operand) in m.iter_mut().zip(operands) {
            *slot = operand.as_float().ok()?;
        }
        Some(Matrix(m))
    }

    /// `self × other`: apply `self` first, then `other`.
    fn then(self, other: Matrix) -> Self {
        let [a1, b1, c1, d1, e1, f1] = self.0;
        let [a2, b2, c2, d2, e2, f2] = other.0;
        Matrix([
            a1 * a2 + b1 * c2,
            a1 * b2 + b1 * d2,
            c1 * a2 + d1 * c2,
            c1 * b2 + d1 * d2,
            e1 * a2 + f1 * c2 + e2,
            e1 * b2 + f1 * d2 + f2,
        ])
    }

    fn origin(&self) -> (f32, f32) {
        (self.0[4], self.0[5])
    }

    fn x_scale(&self) -> f32 {
        self.0[0].hypot(self.0[1])
    }

    fn y_scale(&self) -> f32 {
        self.0[2].hypot(self.0[3])
    }
}

/// One shown string, in page space.
#[derive(Debug, Clone)]
struct Fragment {
    x: f32,
    y: f32,
    end_x: f32,
    size: f32,
    text: String,
}

/// Text state carried across content operations.
struct TextCursor<'a> {
    encodings: &'a BTreeMap<Vec<u8>, String>,
    encoding: Option<String>,
    ctm: Matrix,
    saved: Vec<Matrix>,
    tm: Matrix,
    tlm: Matrix,
    font_size: f32,
    leading: f32,
    fragments: Vec<Fragment>,
}

impl<'a> TextCursor<'a> {
    fn new(encodings: &'a BTreeMap<Vec<u8>, String>) -> Self {
        Self {
            encodings,
            encoding: None,
            ctm: Matrix::IDENTITY,
            saved: Vec::new(),
            tm: Matrix::IDENTITY,
            tlm: Matrix::IDENTITY,
            font_size: 1.0,
            leading: 0.0,
            fragments: Vec::new(),
        }
    }

    fn apply(&mut self, op: &Operation) {
        let operands = &op.operands;
        let num = |idx: usize| operands.get(idx).and_then(|o| o.as_float().ok());

        match op.operator.as_str() {
            "q" => self.saved.push(self.ctm),
            "Q" => {
                if let Some(ctm) = self.saved.pop() {
                    self.ctm = ctm;
                }
            }
            "cm" => {
                if let Some(m) = Matrix::from_operands(operands) {
                    self.ctm = m.then(self.ctm);
                }
            }
            "BT" => {
                self.tm = Matrix::IDENTITY;
                self.tlm = Matrix::IDENTITY;
            }
            "Tf" => {
                self.encoding = operands
                    .first()
                    .and_then(|o| o.as_name().ok())
                    .and_then(|name| self.encodings.get(name))
                    .cloned();
                if let Some(size) = num(1) {
                    self.font_size = size;
                }
            }
            "TL" => {
                if let Some(leading) = num(0) {
                    self.leading = leading;
                }
            }
            "Tm" => {
                if let Some(m) = Matrix::from_operands(operands) {
                    self.tm = m;
                    self.tlm = m;
                }
            }
            "Td" => {
                if let (Some(tx), Some(ty)) = (num(0), num(1)) {
                    self.next_line(tx, ty);
                }
            }
            "TD" => {
                if let (Some(tx), Some(ty)) = (num(0), num(1)) {
                    self.leading = -ty;
                    self.next_line(tx, ty);
                }
            }
            "T*" => self.next_line(0.0, -self.leading),
            "Tj" | "TJ" => self.show(operands),
            "'" => {
                self.next_line(0.0, -self.leading);
                self.show(operands);
            }
            "\"" => {
                self.next_line(0.0, -self.leading);
                self.show(operands.get(2..).unwrap_or(&[]));
            }
            _ => {}
        }
    }

    fn next_line(&mut self, tx: f32, ty: f32) {
        self.tlm = Matrix::translate(tx, ty).then(self.tlm);
        self.tm = self.tlm;
    }

    fn show(&mut self, operands: &[Object]) {
        let mut text = String::new();
        let mut advance = 0.0;
        self.collect(operands, &mut text, &mut advance);

        let placement = self.tm.then(self.ctm);
        let (x, y) = placement.origin();
        let scale = placement.x_scale();
        if !text.trim().is_empty() {
            self.fragments.push(Fragment {
                x,
                y,
                end_x: x + advance * scale,
                size: self.font_size * placement.y_scale(),
                text,
            });
        }
        self.tm = Matrix::translate(advance, 0.0).then(self.tm);
    }

    /// Decode shown strings, accumulating the estimated advance in text space.
    fn collect(&self, operands: &[Object], text: &mut String, advance: &mut f32) {
        for operand in operands {
            match operand {
                Object::String(bytes, _) => {
                    let decoded = Document::decode_text(self.encoding.as_deref(), bytes);
                    *advance += decoded.chars().count() as f32 * GLYPH_ADVANCE * self.font_size;
                    text.push_str(&decoded);
                }
                Object::Array(items) => self.collect(items, text, advance),
                Object::Integer(_) | Object::Real(_) => {
                    let adjust = operand.as_float().unwrap_or(0.0);
                    *advance -= adjust / 1000.0 * self.font_size;
                    if adjust < TJ_SPACE && !text.ends_with(' ') {
                        text.push(' ');
                    }
                }
                _ => {}
            }
        }
    }
}

fn page_fragments(doc: &Document, page_id: ObjectId) -> lopdf::Result<Vec<Fragment>> {
    let encodings: BTreeMap<Vec<u8>, String> = doc
        .get_page_fonts(page_id)
        .into_iter()
        .map(|(name, font)| (name, font.get_font_encoding().to_string()))
        .collect();
    let content = doc.get_and_decode_page_content(page_id)?;

    let mut cursor = TextCursor::new(&encodings);
    for op in &content.operations {
        cursor.apply(op);
    }
    Ok(cursor.fragments)
}

/// Render fragments top to bottom, each line left to right on the grid.
fn layout_page(mut fragments: Vec<Fragment>) -> String {
    if fragments.is_empty() {
        return String::new();
    }
    fragments.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)));
    let left = fragments.iter().map(|f| f.x).fold(f32::INFINITY, f32::min);

    let mut lines: Vec<Vec<Fragment>> = Vec::new();
    for fragment in fragments {
        match lines.last_mut() {
            Some(line) if (line[0].y - fragment.y).abs() <= LINE_TOLERANCE => line.push(fragment),
            _ => lines.push(vec![fragment]),
        }
    }

    lines
        .into_iter()
        .map(|mut line| {
            line.sort_by(|a, b| a.x.total_cmp(&b.x));
            render_line(&line, left)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn render_line(line: &[Fragment], left: f32) -> String {
    let mut out = String::new();
    let mut cursor = 0usize;
    let mut prev_end: Option<f32> = None;

    for fragment in line {
        let grid = ((fragment.x - left) / GRID_WIDTH).round().max(0.0) as usize;
        let start = match prev_end {
            None => grid,
            Some(end) => {
                let em = fragment.size.max(1.0);
                let gap = fragment.x - end;
                if gap < JOIN_GAP * em {
                    cursor
                } else if gap < WORD_GAP * em {
                    cursor + 1
                } else {
                    grid.max(cursor + COLUMN_GAP)
                }
            }
        };

        out.extend(std::iter::repeat(' ').take(start.saturating_sub(cursor)));
        out.push_str(&fragment.text);
        cursor = start.max(cursor) + fragment.text.chars().count();
        prev_end = Some(fragment.end_x);
    }

    out.trim_end().to_string()
}
