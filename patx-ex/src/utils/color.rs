//! Color key helpers

/// Format an RGB triple as a `0xRRGGBB` lowercase key
pub fn rgb_to_hex(red: u8, green: u8, blue: u8) -> String {
    format!("0x{:02x}{:02x}{:02x}", red, green, blue)
}

/// Format a pixel as a color key
pub fn pixel_key(pixel: &[u8; 3]) -> String {
    rgb_to_hex(pixel[0], pixel[1], pixel[2])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_hex_pads_components() {
        assert_eq!(rgb_to_hex(255, 0, 16), "0xff0010");
        assert_eq!(pixel_key(&[1, 2, 3]), "0x010203");
    }
}
