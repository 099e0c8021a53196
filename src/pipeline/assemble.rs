//! Book assembly: lay out the title and pages as a PDF.
//!
//! ## Layout
//!
//! US Letter (612 × 792 pt). A title page, then one page per story page with
//! the illustration scaled into the upper area and the text word-wrapped
//! below it in Helvetica. Pages without an illustration put the text at the
//! top. Text that does not fit continues at the top of the following sheets.
//! A sheet number sits at the bottom centre.
//!
//! The standard Type1 fonts only cover WinAnsi, so characters outside
//! Latin-1 are replaced with `?` (common typographic quotes and dashes are
//! mapped to their ASCII forms first).
//!
//! ## Atomic write
//!
//! The PDF is written to a temp file in the output directory and renamed
//! into place, so a download never sees a half-written book.

use crate::error::{BookError, Stage};
use crate::job::Page;
use async_trait::async_trait;
use lopdf::{dictionary, Document, Object, ObjectId, Stream};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Collaborator that turns a title and pages into a book file.
#[async_trait]
pub trait BookAssembler: Send + Sync {
    async fn assemble(&self, job_id: &str, title: &str, pages: &[Page])
        -> Result<PathBuf, BookError>;
}

/// Assemble stage: bound the collaborator call.
pub async fn assemble(
    assembler: &dyn BookAssembler,
    job_id: &str,
    title: &str,
    pages: &[Page],
    limit: Duration,
) -> Result<PathBuf, BookError> {
    super::with_timeout(Stage::Assemble, limit, assembler.assemble(job_id, title, pages)).await
}

// ── Layout constants ─────────────────────────────────────────────────────

const PAGE_WIDTH: f64 = 612.0;
const PAGE_HEIGHT: f64 = 792.0;
const MARGIN: f64 = 54.0;
const IMAGE_MAX_HEIGHT: f64 = 420.0;
const BODY_FONT_SIZE: f64 = 14.0;
const BODY_LEADING: f64 = 20.0;
const TITLE_FONT_SIZE: f64 = 28.0;
const TITLE_LEADING: f64 = 36.0;
const FOOTER_FONT_SIZE: f64 = 10.0;
/// Average Helvetica glyph width as a fraction of the font size.
const AVG_GLYPH_WIDTH: f64 = 0.5;

// ── lopdf implementation ─────────────────────────────────────────────────

/// [`BookAssembler`] writing `output_dir/book_{job_id}.pdf` with lopdf.
#[derive(Debug, Clone)]
pub struct PdfBookAssembler {
    output_dir: PathBuf,
}

impl PdfBookAssembler {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

#[async_trait]
impl BookAssembler for PdfBookAssembler {
    async fn assemble(
        &self,
        job_id: &str,
        title: &str,
        pages: &[Page],
    ) -> Result<PathBuf, BookError> {
        let target = self.output_dir.join(format!("book_{job_id}.pdf"));
        let dir = self.output_dir.clone();
        let title = title.to_string();
        let pages = pages.to_vec();

        let path = target.clone();
        tokio::task::spawn_blocking(move || {
            let bytes = render_book(&title, &pages)?;
            write_atomically(&dir, &path, &bytes)
        })
        .await
        .map_err(|e| BookError::Internal(format!("Assembly task panicked: {e}")))??;

        info!(path = %target.display(), "Book assembled");
        Ok(target)
    }
}

fn write_atomically(dir: &Path, target: &Path, bytes: &[u8]) -> Result<(), BookError> {
    std::fs::create_dir_all(dir).map_err(|e| BookError::io(dir, e))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(|e| BookError::io(dir, e))?;
    tmp.write_all(bytes).map_err(|e| BookError::io(tmp.path(), e))?;
    tmp.persist(target)
        .map_err(|e| BookError::io(target, e.error))?;
    Ok(())
}

/// Render the whole book into PDF bytes.
pub fn render_book(title: &str, pages: &[Page]) -> Result<Vec<u8>, BookError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
        "Encoding" => "WinAnsiEncoding",
    });
    let bold_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica-Bold",
        "Encoding" => "WinAnsiEncoding",
    });

    let mut kids: Vec<Object> = Vec::with_capacity(pages.len() + 1);

    let title_content = title_page_content(title);
    kids.push(add_page(&mut doc, pages_id, font_id, bold_id, None, title_content).into());

    let mut sheet = 0;
    for (idx, page) in pages.iter().enumerate() {
        let image = load_illustration(&page.image_path);
        let (image_ref, placement) = match image {
            Some((stream, w, h)) => {
                let image_id = doc.add_object(stream);
                (Some(image_id), Some(fit_image(w, h)))
            }
            None => (None, None),
        };

        let sheets = paginate(&page.text, placement);
        if sheets.len() > 1 {
            debug!(page = idx + 1, sheets = sheets.len(), "Page text continues over extra sheets");
        }
        for (i, lines) in sheets.iter().enumerate() {
            sheet += 1;
            // only the first sheet of a page carries its illustration
            let (image_ref, placement) = if i == 0 { (image_ref, placement) } else { (None, None) };
            let content = story_page_content(lines, placement, sheet);
            kids.push(add_page(&mut doc, pages_id, font_id, bold_id, image_ref, content).into());
        }
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)
        .map_err(|e| BookError::collaborator(Stage::Assemble, e))?;
    debug!(bytes = buffer.len(), pages = count, "PDF rendered");
    Ok(buffer)
}

fn add_page(
    doc: &mut Document,
    pages_id: ObjectId,
    font_id: ObjectId,
    bold_id: ObjectId,
    image_id: Option<ObjectId>,
    content: String,
) -> ObjectId {
    let mut resources = dictionary! {
        "Font" => dictionary! {
            "F1" => font_id,
            "F2" => bold_id,
        },
    };
    if let Some(image_id) = image_id {
        resources.set("XObject", dictionary! { "Im1" => image_id });
    }

    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
    doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Resources" => resources,
        "Contents" => content_id,
    })
}

/// Load an illustration as a raw DeviceRGB XObject. Missing or unreadable
/// images are skipped so the page still gets its text.
fn load_illustration(path: &str) -> Option<(Stream, u32, u32)> {
    if path.is_empty() {
        return None;
    }
    let img = match image::open(path) {
        Ok(img) => img,
        Err(e) => {
            warn!(path, "Skipping unreadable illustration: {e}");
            return None;
        }
    };
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let stream = Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => width as i64,
            "Height" => height as i64,
            "ColorSpace" => "DeviceRGB",
            "BitsPerComponent" => 8,
        },
        rgb.into_raw(),
    );
    Some((stream, width, height))
}

/// Image placement: (width, height, x, y) in points.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Placement {
    width: f64,
    height: f64,
    x: f64,
    y: f64,
}

fn fit_image(width: u32, height: u32) -> Placement {
    let available_width = PAGE_WIDTH - 2.0 * MARGIN;
    let scale = (available_width / width.max(1) as f64).min(IMAGE_MAX_HEIGHT / height.max(1) as f64);
    let w = width as f64 * scale;
    let h = height as f64 * scale;
    Placement {
        width: w,
        height: h,
        x: (PAGE_WIDTH - w) / 2.0,
        y: PAGE_HEIGHT - MARGIN - h,
    }
}

fn title_page_content(title: &str) -> String {
    let max_chars = chars_per_line(TITLE_FONT_SIZE);
    let lines = wrap_text(title, max_chars);
    let block_height = lines.len() as f64 * TITLE_LEADING;
    let top = PAGE_HEIGHT / 2.0 + block_height / 2.0;

    let mut content = String::new();
    for (i, line) in lines.iter().enumerate() {
        let x = centred_x(line, TITLE_FONT_SIZE);
        let y = top - i as f64 * TITLE_LEADING;
        content.push_str(&text_op("F2", TITLE_FONT_SIZE, x, y, line));
    }
    content
}

/// Baseline of the first text line, below the illustration if there is one.
fn text_top(image: Option<Placement>) -> f64 {
    match image {
        Some(p) => p.y - 30.0,
        None => PAGE_HEIGHT - MARGIN - BODY_FONT_SIZE,
    }
}

/// How many body lines fit between `top` and the footer. Always at least one.
fn lines_fitting(top: f64) -> usize {
    let floor = MARGIN + 2.0 * FOOTER_FONT_SIZE;
    (((top - floor) / BODY_LEADING).floor().max(0.0) as usize) + 1
}

/// Wrap a page's text and split it into sheets. The first sheet leaves room
/// for the illustration; continuation sheets start at the top.
fn paginate(text: &str, image: Option<Placement>) -> Vec<Vec<String>> {
    let lines = wrap_text(text, chars_per_line(BODY_FONT_SIZE));
    let mut sheets = Vec::new();
    let mut rest = lines.as_slice();
    let mut fit = lines_fitting(text_top(image));
    loop {
        let take = fit.min(rest.len());
        sheets.push(rest[..take].to_vec());
        rest = &rest[take..];
        if rest.is_empty() {
            return sheets;
        }
        fit = lines_fitting(text_top(None));
    }
}

fn story_page_content(lines: &[String], image: Option<Placement>, number: usize) -> String {
    let mut content = String::new();
    if let Some(p) = image {
        content.push_str(&format!(
            "q\n{:.2} 0 0 {:.2} {:.2} {:.2} cm\n/Im1 Do\nQ\n",
            p.width, p.height, p.x, p.y
        ));
    }

    let y = text_top(image);
    content.push_str(&format!(
        "BT\n/F1 {BODY_FONT_SIZE} Tf\n{BODY_LEADING} TL\n{MARGIN:.2} {y:.2} Td\n"
    ));
    for line in lines {
        content.push_str(&format!("({}) Tj T*\n", encode_pdf_text(line)));
    }
    content.push_str("ET\n");

    let label = number.to_string();
    content.push_str(&text_op(
        "F1",
        FOOTER_FONT_SIZE,
        centred_x(&label, FOOTER_FONT_SIZE),
        MARGIN / 2.0,
        &label,
    ));
    content
}

fn text_op(font: &str, size: f64, x: f64, y: f64, text: &str) -> String {
    format!(
        "BT\n/{font} {size} Tf\n{x:.2} {y:.2} Td\n({}) Tj\nET\n",
        encode_pdf_text(text)
    )
}

fn chars_per_line(font_size: f64) -> usize {
    ((PAGE_WIDTH - 2.0 * MARGIN) / (font_size * AVG_GLYPH_WIDTH)) as usize
}

fn centred_x(text: &str, font_size: f64) -> f64 {
    let width = text.chars().count() as f64 * font_size * AVG_GLYPH_WIDTH;
    ((PAGE_WIDTH - width) / 2.0).max(MARGIN)
}

/// Greedy word wrap on character counts. Words longer than a line are split.
pub fn wrap_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word: Vec<char> = word.chars().collect();
        while word.len() > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            lines.push(word.drain(..max_chars).collect());
        }
        let word: String = word.into_iter().collect();
        if word.is_empty() {
            continue;
        }

        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > max_chars {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Escape a string for a PDF literal, emitting WinAnsi bytes.
pub fn encode_pdf_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        let c = match c {
            '\u{2018}' | '\u{2019}' => '\'',
            '\u{201C}' | '\u{201D}' => '"',
            '\u{2013}' | '\u{2014}' => '-',
            '\u{2026}' => {
                out.push_str("...");
                continue;
            }
            other => other,
        };
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            '\u{A0}'..='\u{FF}' => out.push_str(&format!("\\{:03o}", c as u32)),
            _ => out.push('?'),
        }
    }
    out
}
