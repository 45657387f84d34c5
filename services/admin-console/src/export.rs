//! Spreadsheet export
//!
//! `GET /api/members/export?<filters>` walks the whole filtered listing in
//! batches of [`EXPORT_PAGE_SIZE`] and returns one `.xlsx` worksheet with a
//! row per member and a QR code in the last column.

use axum::extract::{Query, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;
use member_api::{EXPORT_PAGE_SIZE, Member, MemberQuery};
use rust_xlsxwriter::{Format, Image, Workbook, XlsxError};
use thiserror::Error;
use tracing::{error, info, instrument};

use crate::AppState;
use crate::cookies::{self, ACCESS_COOKIE};
use crate::error::{ConsoleError, new_request_id};
use crate::qr::{self, EXPORT_STYLE, QrError};

pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

const HEADERS: [&str; 10] = [
    "ID",
    "Name",
    "Age",
    "Nation",
    "Parish",
    "Cathedral",
    "Chosen Diocese",
    "Region",
    "Phone",
    "Emergency Contact",
];
const QR_HEADER: &str = "QR Code";
const QR_COLUMN: u16 = HEADERS.len() as u16;

/// Row height in points that fits an [`EXPORT_STYLE`] image.
const ROW_HEIGHT_PT: f64 = EXPORT_STYLE.size_px as f64 * 0.75;

#[derive(Error, Debug)]
pub enum ExportError {
    #[error("spreadsheet generation failed: {0}")]
    Xlsx(#[from] XlsxError),

    #[error(transparent)]
    Qr(#[from] QrError),
}

#[instrument(skip_all, fields(request_id))]
pub async fn export_handler(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(query): Query<MemberQuery>,
) -> Response {
    let request_id = new_request_id();
    tracing::Span::current().record("request_id", request_id.as_str());

    let Some(access) = cookies::read(&jar, ACCESS_COOKIE) else {
        return ConsoleError::Unauthorized("authentication required".into())
            .into_response_with_id(&request_id);
    };

    let members = match state
        .upstream
        .fetch_all_members(access.expose(), &query.filters_only(), EXPORT_PAGE_SIZE)
        .await
    {
        Ok(members) => members,
        Err(e) => {
            error!(error = %e, "fetching members for export failed");
            state.metrics.record_error();
            if let Some(error_type) = upstream_error_type(&e) {
                crate::metrics::record_upstream_error(error_type);
            }
            let message = match e {
                member_api::Error::Upstream { status, body } => {
                    format!("failed to load member list ({status}): {body}")
                }
                other => other.to_string(),
            };
            return ConsoleError::Internal(message).into_response_with_id(&request_id);
        }
    };

    let count = members.len();
    let front_url = state.front_url.clone();
    let built = tokio::task::spawn_blocking(move || build_workbook(&members, &front_url)).await;
    let bytes = match built {
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            error!(error = %e, "spreadsheet generation failed");
            state.metrics.record_error();
            return ConsoleError::Internal(e.to_string()).into_response_with_id(&request_id);
        }
        Err(e) => {
            error!(error = %e, "spreadsheet task panicked");
            state.metrics.record_error();
            return ConsoleError::Internal("spreadsheet generation failed".into())
                .into_response_with_id(&request_id);
        }
    };

    info!(members = count, bytes = bytes.len(), "export generated");
    let disposition = format!("attachment; filename=\"{}\"", export_filename(chrono::Utc::now()));
    (
        [
            (CONTENT_TYPE, XLSX_CONTENT_TYPE.to_owned()),
            (CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response()
}

fn upstream_error_type(err: &member_api::Error) -> Option<&'static str> {
    match err {
        member_api::Error::Timeout(_) => Some("timeout"),
        member_api::Error::Http(_) => Some("connection"),
        member_api::Error::Upstream { .. } => Some("status"),
        member_api::Error::Decode(_) => Some("decode"),
    }
}

pub fn export_filename(now: chrono::DateTime<chrono::Utc>) -> String {
    format!("members-{}.xlsx", now.format("%Y-%m-%d"))
}

/// Render the worksheet. CPU-bound; run off the async workers.
pub fn build_workbook(members: &[Member], front_url: &str) -> Result<Vec<u8>, ExportError> {
    let mut workbook = Workbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Members")?;

    let bold = Format::new().set_bold();
    for (col, label) in HEADERS.iter().chain([QR_HEADER].iter()).enumerate() {
        sheet.write_string_with_format(0, col as u16, *label, &bold)?;
    }
    sheet.set_row_height(0, 20)?;
    for col in 0..QR_COLUMN {
        sheet.set_column_width(col, if col == 0 { 10 } else { 16 })?;
    }
    sheet.set_column_width(QR_COLUMN, f64::from(EXPORT_STYLE.size_px) / 6.0)?;

    for (i, member) in members.iter().enumerate() {
        let row = (i + 1) as u32;
        let d = &member.details;
        let text_cells = [
            (0, Some(member.id.as_str())),
            (1, d.name.as_deref()),
            (3, d.nation.as_deref()),
            (4, d.parish.as_deref()),
            (5, d.cathedral.as_deref()),
            (6, d.chosen_diocese.as_deref()),
            (7, d.region.as_deref()),
            (8, d.phone.as_deref()),
            (9, d.emergency_num.as_deref()),
        ];
        for (col, value) in text_cells {
            if let Some(value) = value {
                sheet.write_string(row, col, value)?;
            }
        }
        if let Some(age) = d.age {
            sheet.write_number(row, 2, f64::from(age))?;
        }

        let png = qr::render_png(&qr::export_payload(front_url, &member.id), EXPORT_STYLE)?;
        let image = Image::new_from_buffer(&png)?;
        sheet.insert_image_fit_to_cell(row, QR_COLUMN, &image, false)?;
        sheet.set_row_height(row, ROW_HEIGHT_PT)?;
    }

    Ok(workbook.save_to_buffer()?)
}
