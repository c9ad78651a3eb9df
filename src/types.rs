#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    pub(crate) fn to_sk_rect(self) -> Option<tiny_skia::Rect> {
        tiny_skia::Rect::from_xywh(self.x, self.y, self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };

    pub const DEBUG_BORDER: Color = Color {
        r: 1.0,
        g: 0.0,
        b: 0.0,
        a: 1.0,
    };

    pub fn rgb(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b, a: 1.0 }
    }

    pub fn rgba(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Parses `#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa` and a handful of named colors.
    pub fn from_css(raw: &str) -> Option<Self> {
        let value = raw.trim();
        if let Some(hex) = value.strip_prefix('#') {
            return parse_hex(hex);
        }
        match value.to_ascii_lowercase().as_str() {
            "black" => Some(Color::BLACK),
            "white" => Some(Color::rgb(1.0, 1.0, 1.0)),
            "red" => Some(Color::rgb(1.0, 0.0, 0.0)),
            "green" => Some(Color::rgb(0.0, 128.0 / 255.0, 0.0)),
            "blue" => Some(Color::rgb(0.0, 0.0, 1.0)),
            "gray" | "grey" => Some(Color::rgb(128.0 / 255.0, 128.0 / 255.0, 128.0 / 255.0)),
            "transparent" => Some(Color::rgba(0.0, 0.0, 0.0, 0.0)),
            _ => None,
        }
    }

    pub(crate) fn to_sk_color(self) -> tiny_skia::Color {
        tiny_skia::Color::from_rgba(
            self.r.clamp(0.0, 1.0),
            self.g.clamp(0.0, 1.0),
            self.b.clamp(0.0, 1.0),
            self.a.clamp(0.0, 1.0),
        )
        .unwrap_or_else(|| tiny_skia::Color::from_rgba8(0, 0, 0, 255))
    }
}

fn parse_hex(hex: &str) -> Option<Color> {
    if !hex.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return None;
    }
    let nibble = |idx: usize| -> Option<f32> {
        let v = u8::from_str_radix(&hex[idx..idx + 1], 16).ok()?;
        Some((v * 17) as f32 / 255.0)
    };
    let byte = |idx: usize| -> Option<f32> {
        let v = u8::from_str_radix(&hex[idx..idx + 2], 16).ok()?;
        Some(v as f32 / 255.0)
    };
    match hex.len() {
        3 => Some(Color::rgb(nibble(0)?, nibble(1)?, nibble(2)?)),
        4 => Some(Color::rgba(nibble(0)?, nibble(1)?, nibble(2)?, nibble(3)?)),
        6 => Some(Color::rgb(byte(0)?, byte(2)?, byte(4)?)),
        8 => Some(Color::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_short_and_long_hex() {
        assert_eq!(Color::from_css("#fff"), Some(Color::rgb(1.0, 1.0, 1.0)));
        assert_eq!(Color::from_css("#ff0000"), Some(Color::rgb(1.0, 0.0, 0.0)));
        let half = Color::from_css("#00000080").unwrap();
        assert!((half.a - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_malformed_colors() {
        assert_eq!(Color::from_css("#12"), None);
        assert_eq!(Color::from_css("#zzzzzz"), None);
        assert_eq!(Color::from_css("chartreuse-ish"), None);
    }

    #[test]
    fn named_colors_are_case_insensitive() {
        assert_eq!(Color::from_css(" Black "), Some(Color::BLACK));
    }
}
