//! Terminal QR code for the view URL.

use qrcode::{EcLevel, QrCode, render::unicode::Dense1x2, types::QrError};

/// Render `text` as a QR code drawn with half-block characters.
///
/// Colors are inverted so the code scans on dark terminals.
pub fn render_qr(text: &str) -> Result<String, QrError> {
    let code = QrCode::with_error_correction_level(text, EcLevel::L)?;
    Ok(code
        .render::<Dense1x2>()
        .dark_color(Dense1x2::Light)
        .light_color(Dense1x2::Dark)
        .quiet_zone(true)
        .build())
}
