//! Transcript PDF export
//!
//! The browser renders the report header (student id, philosopher, question,
//! reflection) and the full chat area to PNGs; this module composes them into
//! a portrait A4 PDF. Both images are scaled to the full page width. The
//! transcript image is usually taller than one page, so it is drawn once per
//! page with a growing upward offset and the page boundary clips the slice.

use chrono::NaiveDate;
use printpdf::{Image, ImageTransform, Mm, PdfDocument, PdfLayerReference};
use thiserror::Error;

pub const A4_WIDTH_MM: f32 = 210.0;
pub const A4_HEIGHT_MM: f32 = 297.0;

/// Blank strip kept below the content on every page.
const BOTTOM_MARGIN_MM: f32 = 5.0;

/// Gap between the header block and the first transcript slice.
const HEADER_GAP_MM: f32 = 5.0;

const MM_PER_INCH: f32 = 25.4;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("image did not decode: {0}")]
    Image(#[from] printpdf::image_crate::ImageError),
    #[error("pdf generation failed: {0}")]
    Pdf(#[from] printpdf::Error),
    #[error("image has zero width")]
    EmptyImage,
}

/// Client-rendered report images, PNG encoded.
pub struct RenderedReport {
    pub header_png: Vec<u8>,
    pub transcript_png: Vec<u8>,
}

/// Download filename: first whitespace-separated token of the student info
/// (usually the student number), the philosopher, and the date.
pub fn export_filename(student_info: &str, philosopher: &str, date: NaiveDate) -> String {
    let student = student_info
        .split_whitespace()
        .next()
        .unwrap_or("학생");
    format!("{student}_{philosopher}_{}.pdf", date.format("%Y-%m-%d"))
}

/// Compose the report PDF from the encoded images.
pub fn compose_pdf(report: &RenderedReport) -> Result<Vec<u8>, ExportError> {
    let header = printpdf::image_crate::load_from_memory(&report.header_png)?;
    let transcript = printpdf::image_crate::load_from_memory(&report.transcript_png)?;
    compose_images(&header, &transcript)
}

fn compose_images(
    header: &printpdf::image_crate::DynamicImage,
    transcript: &printpdf::image_crate::DynamicImage,
) -> Result<Vec<u8>, ExportError> {
    let header_fit = Fitted::to_width(header, A4_WIDTH_MM)?;
    let transcript_fit = Fitted::to_width(transcript, A4_WIDTH_MM)?;

    let usable_height = A4_HEIGHT_MM - BOTTOM_MARGIN_MM;
    let transcript_top = header_fit.height_mm + HEADER_GAP_MM;
    let first_slice = usable_height - transcript_top;

    let offsets = slice_offsets(transcript_fit.height_mm, first_slice, usable_height);

    let (doc, first_page, first_layer) =
        PdfDocument::new("대화 기록", Mm(A4_WIDTH_MM), Mm(A4_HEIGHT_MM), "content");

    for (index, offset) in offsets.iter().enumerate() {
        let layer = if index == 0 {
            doc.get_page(first_page).get_layer(first_layer)
        } else {
            let (page, layer) = doc.add_page(Mm(A4_WIDTH_MM), Mm(A4_HEIGHT_MM), "content");
            doc.get_page(page).get_layer(layer)
        };

        if index == 0 {
            place_image(&layer, header, &header_fit, 0.0);
        }

        // Image point `offset` lands at the top of this page's content area.
        let content_top = if index == 0 { transcript_top } else { 0.0 };
        place_image(&layer, transcript, &transcript_fit, content_top - offset);
    }

    Ok(doc.save_to_bytes()?)
}

/// Add one full-width image so its top edge sits `top_mm` below the page top.
/// Negative `top_mm` pushes earlier slices above the page, where the page
/// boundary clips them.
fn place_image(
    layer: &PdfLayerReference,
    image: &printpdf::image_crate::DynamicImage,
    fit: &Fitted,
    top_mm: f32,
) {
    let translate_y = A4_HEIGHT_MM - top_mm - fit.height_mm;
    Image::from_dynamic_image(image).add_to_layer(
        layer.clone(),
        ImageTransform {
            translate_x: Some(Mm(0.0)),
            translate_y: Some(Mm(translate_y)),
            dpi: Some(fit.dpi),
            ..Default::default()
        },
    );
}

/// Scaling of a pixel image onto a fixed width in millimeters, expressed as
/// the dpi that makes the widths coincide.
struct Fitted {
    height_mm: f32,
    dpi: f32,
}

impl Fitted {
    fn to_width(
        image: &printpdf::image_crate::DynamicImage,
        width_mm: f32,
    ) -> Result<Self, ExportError> {
        use printpdf::image_crate::GenericImageView;
        let (width_px, height_px) = image.dimensions();
        if width_px == 0 {
            return Err(ExportError::EmptyImage);
        }
        Ok(Self {
            height_mm: height_px as f32 * width_mm / width_px as f32,
            dpi: width_px as f32 * MM_PER_INCH / width_mm,
        })
    }
}

/// Per-page offsets into the transcript image, in mm. The first page has
/// less room because the header sits above the first slice; every later page
/// consumes `full_height`.
fn slice_offsets(image_height: f32, first_height: f32, full_height: f32) -> Vec<f32> {
    let mut offsets = vec![0.0];
    if full_height <= 0.0 {
        return offsets;
    }
    let mut consumed = first_height.max(0.0);
    while consumed < image_height {
        offsets.push(consumed);
        consumed += full_height;
    }
    offsets
}
