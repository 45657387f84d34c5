//! Member QR codes
//!
//! Two renderings of the same idea: a small code embedded in each export
//! row that links to `<front_url>/?id=<id>`, and a larger downloadable PNG
//! that links to the member's public page at `<front_url>/member.html?id=<id>`.

use std::io::Cursor;

use axum::extract::{Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use image::{ImageBuffer, ImageFormat, Rgb, RgbImage};
use qrcode::QrCode;
use thiserror::Error;
use tracing::{instrument, warn};

use crate::AppState;
use crate::error::{ConsoleError, new_request_id};

const DARK: Rgb<u8> = Rgb([0x18, 0x18, 0x1b]);
const LIGHT: Rgb<u8> = Rgb([0xff, 0xff, 0xff]);

/// Size and quiet zone for one QR rendering.
#[derive(Debug, Clone, Copy)]
pub struct QrStyle {
    /// Target edge length in pixels.
    pub size_px: u32,
    /// Quiet zone in modules.
    pub margin: u32,
}

/// Embedded in spreadsheet rows.
pub const EXPORT_STYLE: QrStyle = QrStyle {
    size_px: 80,
    margin: 1,
};

/// Served by the per-member download.
pub const DOWNLOAD_STYLE: QrStyle = QrStyle {
    size_px: 160,
    margin: 2,
};

#[derive(Error, Debug)]
pub enum QrError {
    #[error("QR encoding failed: {0}")]
    Encode(#[from] qrcode::types::QrError),

    #[error("PNG encoding failed: {0}")]
    Image(#[from] image::ImageError),
}

pub fn export_payload(front_url: &str, id: &str) -> String {
    format!("{front_url}/?id={id}")
}

pub fn member_page_payload(front_url: &str, id: &str) -> String {
    format!("{front_url}/member.html?id={id}")
}

/// Render `payload` as a square PNG.
///
/// Modules are whole pixels, so the image is `size_px` wide unless the code
/// needs more room than that, in which case one pixel per module is used.
pub fn render_png(payload: &str, style: QrStyle) -> Result<Vec<u8>, QrError> {
    let code = QrCode::new(payload.as_bytes())?;
    let modules = code.width() as u32 + 2 * style.margin;
    let module_px = (style.size_px / modules).max(1);

    let symbol = code
        .render::<Rgb<u8>>()
        .quiet_zone(false)
        .module_dimensions(module_px, module_px)
        .dark_color(DARK)
        .light_color(LIGHT)
        .build();

    let edge = style.size_px.max(modules * module_px);
    let mut canvas: RgbImage = ImageBuffer::from_pixel(edge, edge, LIGHT);
    let offset = i64::from((edge - symbol.width()) / 2);
    image::imageops::overlay(&mut canvas, &symbol, offset, offset);

    let mut png = Vec::new();
    canvas.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
    Ok(png)
}

/// `GET /api/members/{id}/qr`
#[instrument(skip_all, fields(member_id = %id))]
pub async fn member_qr_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let payload = member_page_payload(&state.front_url, &id);
    match render_png(&payload, DOWNLOAD_STYLE) {
        Ok(png) => {
            let disposition = format!("attachment; filename=\"{}\"", download_filename(&id));
            (
                [(CONTENT_TYPE, "image/png".to_owned()), (CONTENT_DISPOSITION, disposition)],
                png,
            )
                .into_response()
        }
        Err(e) => {
            warn!(error = %e, "QR rendering failed");
            state.metrics.record_error();
            ConsoleError::Internal(e.to_string()).into_response_with_id(&new_request_id())
        }
    }
}

/// Attachment name with anything outside `[A-Za-z0-9_-]` replaced, so the
/// id cannot break out of the quoted header value.
fn download_filename(id: &str) -> String {
    let safe: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    format!("member-{safe}-qr.png")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(png: &[u8]) -> RgbImage {
        image::load_from_memory_with_format(png, ImageFormat::Png)
            .unwrap()
            .to_rgb8()
    }

    #[test]
    fn payloads_point_at_front_site() {
        assert_eq!(
            export_payload("https://front.example.org", "42"),
            "https://front.example.org/?id=42"
        );
        assert_eq!(
            member_page_payload("https://front.example.org", "42"),
            "https://front.example.org/member.html?id=42"
        );
    }

    #[test]
    fn download_png_is_requested_size_with_light_margin() {
        let png = render_png("https://front.example.org/member.html?id=42", DOWNLOAD_STYLE).unwrap();
        assert_eq!(&png[..4], b"\x89PNG");

        let image = decode(&png);
        assert_eq!(image.width(), 160);
        assert_eq!(image.height(), 160);
        assert_eq!(*image.get_pixel(0, 0), LIGHT);
        assert!(image.pixels().any(|p| *p == DARK), "code must use the dark colour");
    }

    #[test]
    fn export_png_fits_cell_size() {
        let image = decode(&render_png("https://front.example.org/?id=7", EXPORT_STYLE).unwrap());
        assert_eq!(image.width(), 80);
        assert_eq!(*image.get_pixel(0, 0), LIGHT);
    }

    #[test]
    fn tiny_target_still_renders_every_module() {
        let style = QrStyle {
            size_px: 10,
            margin: 1,
        };
        let image = decode(&render_png("https://front.example.org/?id=7", style).unwrap());
        assert!(image.width() >= 23, "21 modules plus margin, got {}", image.width());
    }

    #[test]
    fn filename_is_sanitized() {
        assert_eq!(download_filename("42"), "member-42-qr.png");
        assert_eq!(download_filename("a\"b/c"), "member-a_b_c-qr.png");
    }
}
