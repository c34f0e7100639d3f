//! Terminal rendering of pairing QR codes.

use pairgate_core::error::PairgateError;

/// Render a QR code for terminal display using Unicode half-block characters.
///
/// Packs two rows of modules into one line of text using `▀`, `▄`, `█`, and
/// space, with a one-module light border so dark-themed terminals scan it.
pub fn generate_qr_terminal(qr_data: &str) -> Result<String, PairgateError> {
    use qrcode::{Color, EcLevel, QrCode};

    let code = QrCode::with_error_correction_level(qr_data.as_bytes(), EcLevel::L)
        .map_err(|e| PairgateError::Upstream(format!("QR generation failed: {e}")))?;

    let width = code.width();
    let colors: Vec<Color> = code.into_colors();
    // Coordinates include the border, so the code itself starts at 1.
    let padded = width + 2;
    let is_dark = |row: usize, col: usize| -> bool {
        if row == 0 || col == 0 || row > width || col > width {
            return false;
        }
        colors[(row - 1) * width + (col - 1)] == Color::Dark
    };

    let mut out = String::new();
    let mut row = 0;
    while row < padded {
        for col in 0..padded {
            let top = is_dark(row, col);
            let bottom = row + 1 < padded && is_dark(row + 1, col);
            out.push(match (top, bottom) {
                (true, true) => '█',
                (true, false) => '▀',
                (false, true) => '▄',
                (false, false) => ' ',
            });
        }
        out.push('\n');
        row += 2;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_qr_terminal() {
        let qr = generate_qr_terminal("2@abc,def,ghi,jkl").unwrap();
        assert!(!qr.is_empty());
        assert!(qr.contains('█') || qr.contains('▀') || qr.contains('▄'));
    }

    #[test]
    fn test_rows_are_square_width() {
        let qr = generate_qr_terminal("test-data").unwrap();
        let widths: Vec<usize> = qr.lines().map(|l| l.chars().count()).collect();
        assert!(widths.windows(2).all(|w| w[0] == w[1]));
        // Two module rows per text line.
        assert_eq!(widths.len(), widths[0].div_ceil(2));
    }
}
