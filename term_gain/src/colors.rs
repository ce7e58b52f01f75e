use image::Rgba;

use crate::GainError;

/// Line colours for events that do not name one.
const PALETTE: [[u8; 3]; 10] = [
    [31, 119, 180],
    [255, 127, 14],
    [44, 160, 44],
    [214, 39, 40],
    [148, 103, 189],
    [140, 86, 75],
    [227, 119, 194],
    [127, 127, 127],
    [188, 189, 34],
    [23, 190, 207],
];

pub fn palette_color(index: usize) -> Rgba<u8> {
    let [r, g, b] = PALETTE[index % PALETTE.len()];
    Rgba([r, g, b, 255])
}

/// Parse a colour name (`red`, `blue`, …) or a `#rrggbb` hex string.
pub fn parse_color(input: &str) -> Result<Rgba<u8>, GainError> {
    let name = input.trim().to_ascii_lowercase();
    let rgb = match name.as_str() {
        "red" => [255, 0, 0],
        "blue" => [0, 0, 255],
        "green" => [0, 128, 0],
        "black" => [0, 0, 0],
        "white" => [255, 255, 255],
        "gray" | "grey" => [128, 128, 128],
        "orange" => [255, 165, 0],
        "purple" => [128, 0, 128],
        "yellow" => [255, 255, 0],
        "cyan" => [0, 255, 255],
        "magenta" => [255, 0, 255],
        "navy" => [0, 0, 128],
        "darkred" => [139, 0, 0],
        _ => return parse_hex(&name).ok_or_else(|| GainError::InvalidColor(input.to_string())),
    };
    Ok(Rgba([rgb[0], rgb[1], rgb[2], 255]))
}

fn parse_hex(input: &str) -> Option<Rgba<u8>> {
    let hex = input.strip_prefix('#')?;
    if hex.len() != 6 || !hex.is_ascii() {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some(Rgba([channel(0)?, channel(2)?, channel(4)?, 255]))
}
