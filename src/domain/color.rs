//! Hex color parsing for mask, line and stroke colors

use image::Rgba;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ColorError {
    #[error("Invalid hex color: {0}")]
    InvalidHex(String),
}

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa` (leading `#` optional)
pub fn parse_hex_color(input: &str) -> Result<Rgba<u8>, ColorError> {
    let hex = input.trim().trim_start_matches('#');
    let invalid = || ColorError::InvalidHex(input.to_string());

    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }

    let byte = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());

    match hex.len() {
        3 => {
            let mut rgb = [0u8; 3];
            for (i, c) in hex.chars().enumerate() {
                let v = byte(&c.to_string())?;
                rgb[i] = v * 17;
            }
            Ok(Rgba([rgb[0], rgb[1], rgb[2], 255]))
        }
        6 => Ok(Rgba([byte(&hex[0..2])?, byte(&hex[2..4])?, byte(&hex[4..6])?, 255])),
        8 => Ok(Rgba([
            byte(&hex[0..2])?,
            byte(&hex[2..4])?,
            byte(&hex[4..6])?,
            byte(&hex[6..8])?,
        ])),
        _ => Err(invalid()),
    }
}
