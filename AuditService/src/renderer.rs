//! PDF rendering of a completed audit.
//!
//! Layout is computed as plain lines first and paginated before anything is
//! drawn, so the document structure can be checked without parsing PDF.

use audit_models::{AnalysisReport, AuditError, AuditResult};
use printpdf::{BuiltinFont, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::debug;

const PAGE_WIDTH_MM: f32 = 210.0;
const PAGE_HEIGHT_MM: f32 = 297.0;
const MARGIN_MM: f32 = 20.0;
const LINE_HEIGHT_MM: f32 = 6.0;
const WRAP_COLUMNS: usize = 90;

pub const NO_VULNERABILITIES: &str = "No vulnerabilities found.";
pub const NO_GAS_SUGGESTIONS: &str = "No gas optimization suggestions found.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStyle {
    Title,
    Heading,
    Body,
    Blank,
}

impl LineStyle {
    fn font_size(&self) -> f32 {
        match self {
            LineStyle::Title => 18.0,
            LineStyle::Heading => 14.0,
            LineStyle::Body | LineStyle::Blank => 11.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    pub style: LineStyle,
    pub indent: u8,
    pub text: String,
}

impl Line {
    fn new(style: LineStyle, indent: u8, text: impl Into<String>) -> Self {
        Self {
            style,
            indent,
            text: text.into(),
        }
    }

    fn blank() -> Self {
        Self::new(LineStyle::Blank, 0, "")
    }
}

/// Formats an integer with thousands separators.
pub fn format_number(num: u64) -> String {
    let mut s = String::new();
    let num_str = num.to_string();
    for (i, c) in num_str.chars().rev().enumerate() {
        if i != 0 && i % 3 == 0 {
            s.insert(0, ',');
        }
        s.insert(0, c);
    }
    s
}

/// Formats a non-negative amount with thousands separators and at most two
/// decimals. Whole amounts print without a fractional part.
pub fn format_amount(value: f64) -> String {
    let rounded = (value.max(0.0) * 100.0).round() / 100.0;
    let whole = rounded.trunc();
    let cents = ((rounded - whole) * 100.0).round() as u64;
    let integer = format_number(whole as u64);
    if cents == 0 {
        return integer;
    }
    let fraction = format!("{:02}", cents);
    format!("{}.{}", integer, fraction.trim_end_matches('0'))
}

/// Greedy word wrap. Words longer than `width` are split.
pub fn wrap(text: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word = word.to_string();
        while word.chars().count() > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let head: String = word.chars().take(width).collect();
            word = word.chars().skip(width).collect();
            lines.push(head);
        }
        if current.is_empty() {
            current = word;
        } else if current.chars().count() + 1 + word.chars().count() <= width {
            current.push(' ');
            current.push_str(&word);
        } else {
            lines.push(std::mem::replace(&mut current, word));
        }
    }
    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

fn push_wrapped(lines: &mut Vec<Line>, indent: u8, text: &str) {
    let width = WRAP_COLUMNS.saturating_sub(indent as usize * 4).max(20);
    for piece in wrap(text, width) {
        lines.push(Line::new(LineStyle::Body, indent, piece));
    }
}

/// Document lines for one audit, before pagination.
pub fn layout(audit_id: &str, report: &AnalysisReport) -> Vec<Line> {
    let mut lines = vec![
        Line::new(LineStyle::Title, 0, format!("Audit Report - {}", audit_id)),
        Line::blank(),
        Line::new(LineStyle::Heading, 0, "Vulnerabilities"),
    ];

    if report.vulnerabilities.is_empty() {
        lines.push(Line::new(LineStyle::Body, 0, NO_VULNERABILITIES));
    }
    for (index, finding) in report.vulnerabilities.iter().enumerate() {
        lines.push(Line::new(
            LineStyle::Body,
            0,
            format!(
                "{}. [{}] Line {}",
                index + 1,
                finding.severity.as_str().to_uppercase(),
                finding.line
            ),
        ));
        push_wrapped(&mut lines, 1, &format!("Issue: {}", finding.issue));
        push_wrapped(&mut lines, 1, &format!("Recommendation: {}", finding.recommendation));
        lines.push(Line::blank());
    }

    let gas = &report.gas_optimizations;
    lines.push(Line::blank());
    lines.push(Line::new(LineStyle::Heading, 0, "Gas Optimizations"));
    lines.push(Line::new(
        LineStyle::Body,
        0,
        format!("Estimated gas usage: {}", format_amount(gas.estimated_gas)),
    ));

    if gas.suggestions.is_empty() {
        lines.push(Line::new(LineStyle::Body, 0, NO_GAS_SUGGESTIONS));
    }
    for (index, suggestion) in gas.suggestions.iter().enumerate() {
        lines.push(Line::new(
            LineStyle::Body,
            0,
            format!(
                "{}. Line {} (saves ~{} gas)",
                index + 1,
                suggestion.line,
                format_amount(suggestion.estimated_savings)
            ),
        ));
        push_wrapped(&mut lines, 1, &suggestion.description);
    }

    lines
}

/// Splits lines into pages of at most `per_page` lines. Always yields at least one page.
pub fn paginate(lines: Vec<Line>, per_page: usize) -> Vec<Vec<Line>> {
    let per_page = per_page.max(1);
    let mut pages: Vec<Vec<Line>> = lines.chunks(per_page).map(<[Line]>::to_vec).collect();
    if pages.is_empty() {
        pages.push(Vec::new());
    }
    pages
}

fn lines_per_page() -> usize {
    ((PAGE_HEIGHT_MM - 2.0 * MARGIN_MM) / LINE_HEIGHT_MM) as usize
}

/// A rendered document in a transient file.
///
/// The file is removed when this value is dropped or `cleanup` is called,
/// whichever comes first. Whoever holds it owns that cleanup.
#[derive(Debug)]
pub struct RenderedReport {
    path: TempPath,
    pages: usize,
}

impl RenderedReport {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pages(&self) -> usize {
        self.pages
    }

    pub fn into_temp_path(self) -> TempPath {
        self.path
    }

    pub fn cleanup(self) -> AuditResult<()> {
        self.path
            .close()
            .map_err(|e| AuditError::Render(format!("failed to remove report file: {}", e)))
    }
}

/// Writes report PDFs into a scratch directory.
#[derive(Debug, Clone)]
pub struct ReportRenderer {
    dir: PathBuf,
}

impl ReportRenderer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn render(&self, audit_id: &str, report: &AnalysisReport) -> AuditResult<RenderedReport> {
        let pages = paginate(layout(audit_id, report), lines_per_page());
        let page_count = pages.len();

        let file = tempfile::Builder::new()
            .prefix(&format!("audit-{}-", audit_id))
            .suffix(".pdf")
            .tempfile_in(&self.dir)
            .map_err(|e| AuditError::Render(format!("cannot create report file: {}", e)))?;
        let (file, path) = file.into_parts();

        let doc = draw(audit_id, pages)?;
        save(doc, file)?;

        debug!(audit_id, pages = page_count, path = %path.display(), "report rendered");
        Ok(RenderedReport { path, pages: page_count })
    }

    /// Renders on the blocking pool.
    pub async fn render_async(&self, audit_id: &str, report: &AnalysisReport) -> AuditResult<RenderedReport> {
        let renderer = self.clone();
        let audit_id = audit_id.to_string();
        let report = report.clone();
        tokio::task::spawn_blocking(move || renderer.render(&audit_id, &report))
            .await
            .map_err(|e| AuditError::Render(format!("render task failed: {}", e)))?
    }
}

fn render_err(e: impl std::fmt::Display) -> AuditError {
    AuditError::Render(e.to_string())
}

fn draw(audit_id: &str, pages: Vec<Vec<Line>>) -> AuditResult<PdfDocumentReference> {
    let (doc, first_page, first_layer) = PdfDocument::new(
        format!("Audit Report - {}", audit_id),
        Mm(PAGE_WIDTH_MM),
        Mm(PAGE_HEIGHT_MM),
        "Layer 1",
    );
    let regular: IndirectFontRef = doc.add_builtin_font(BuiltinFont::Helvetica).map_err(render_err)?;
    let bold: IndirectFontRef = doc.add_builtin_font(BuiltinFont::HelveticaBold).map_err(render_err)?;

    for (index, page_lines) in pages.iter().enumerate() {
        let layer = if index == 0 {
            doc.get_page(first_page).get_layer(first_layer)
        } else {
            let (page, layer) = doc.add_page(Mm(PAGE_WIDTH_MM), Mm(PAGE_HEIGHT_MM), "Layer 1");
            doc.get_page(page).get_layer(layer)
        };

        let mut y = PAGE_HEIGHT_MM - MARGIN_MM;
        for line in page_lines {
            if line.style != LineStyle::Blank {
                let font = match line.style {
                    LineStyle::Title | LineStyle::Heading => &bold,
                    _ => &regular,
                };
                let x = MARGIN_MM + f32::from(line.indent) * 6.0;
                layer.use_text(line.text.clone(), line.style.font_size(), Mm(x), Mm(y), font);
            }
            y -= LINE_HEIGHT_MM;
        }
    }

    Ok(doc)
}

fn save(doc: PdfDocumentReference, file: File) -> AuditResult<()> {
    let mut writer = BufWriter::new(file);
    doc.save(&mut writer).map_err(render_err)
}
