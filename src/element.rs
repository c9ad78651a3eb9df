use crate::error::RasterError;
use crate::types::{Color, Rect};
use serde::{Deserialize, Serialize};

pub const MIN_RENDER_SCALE: f32 = 0.5;
pub const MAX_RENDER_SCALE: f32 = 10.0;

/// Fields shared by every element kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementBase {
    pub id: i64,
    pub position_x: f32,
    pub position_y: f32,
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub render_order: i32,
}

impl ElementBase {
    pub fn new(id: i64, x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            id,
            position_x: x,
            position_y: y,
            width,
            height,
            hidden: false,
            render_order: 0,
        }
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(self.position_x, self.position_y, self.width, self.height)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Alignment {
    #[default]
    TopStart,
    TopCenter,
    TopEnd,
    CenterStart,
    Center,
    CenterEnd,
    BottomStart,
    BottomCenter,
    BottomEnd,
    BaselineStart,
    BaselineCenter,
    BaselineEnd,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HorizontalAnchor {
    Start,
    Center,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerticalPlacement {
    Top,
    Center,
    Bottom,
}

impl Alignment {
    pub fn horizontal(self) -> HorizontalAnchor {
        match self {
            Alignment::TopStart
            | Alignment::CenterStart
            | Alignment::BottomStart
            | Alignment::BaselineStart => HorizontalAnchor::Start,
            Alignment::TopCenter
            | Alignment::Center
            | Alignment::BottomCenter
            | Alignment::BaselineCenter => HorizontalAnchor::Center,
            Alignment::TopEnd
            | Alignment::CenterEnd
            | Alignment::BottomEnd
            | Alignment::BaselineEnd => HorizontalAnchor::End,
        }
    }

    // Baseline variants sit the block on the bottom edge.
    pub fn vertical(self) -> VerticalPlacement {
        match self {
            Alignment::TopStart | Alignment::TopCenter | Alignment::TopEnd => {
                VerticalPlacement::Top
            }
            Alignment::CenterStart | Alignment::Center | Alignment::CenterEnd => {
                VerticalPlacement::Center
            }
            Alignment::BottomStart
            | Alignment::BottomCenter
            | Alignment::BottomEnd
            | Alignment::BaselineStart
            | Alignment::BaselineCenter
            | Alignment::BaselineEnd => VerticalPlacement::Bottom,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextLayoutPolicy {
    Wrap,
    Truncate,
    Shrink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    #[default]
    Contain,
    Cover,
    Fill,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextElement {
    #[serde(flatten)]
    pub base: ElementBase,
    pub text: String,
    pub font_family: String,
    pub font_size: f32,
    #[serde(default = "default_text_color")]
    pub color: String,
    #[serde(default)]
    pub alignment: Alignment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<TextLayoutPolicy>,
}

fn default_text_color() -> String {
    "#000000".to_string()
}

impl TextElement {
    pub fn new(
        base: ElementBase,
        text: impl Into<String>,
        font_family: impl Into<String>,
        font_size: f32,
    ) -> Self {
        Self {
            base,
            text: text.into(),
            font_family: font_family.into(),
            font_size,
            color: default_text_color(),
            alignment: Alignment::default(),
            layout: None,
        }
    }

    pub fn fill_color(&self) -> Color {
        Color::from_css(&self.color).unwrap_or(Color::BLACK)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageElement {
    #[serde(flatten)]
    pub base: ElementBase,
    pub image_url: String,
    #[serde(default)]
    pub fit: FitMode,
}

impl ImageElement {
    pub fn new(base: ElementBase, image_url: impl Into<String>, fit: FitMode) -> Self {
        Self {
            base,
            image_url: image_url.into(),
            fit,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum Element {
    Text(TextElement),
    Image(ImageElement),
}

impl Element {
    pub fn base(&self) -> &ElementBase {
        match self {
            Element::Text(text) => &text.base,
            Element::Image(image) => &image.base,
        }
    }

    pub fn base_mut(&mut self) -> &mut ElementBase {
        match self {
            Element::Text(text) => &mut text.base,
            Element::Image(image) => &mut image.base,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.base().hidden
    }

    pub fn render_order(&self) -> i32 {
        self.base().render_order
    }

    pub fn bounds(&self) -> Rect {
        self.base().bounds()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub width: f32,
    pub height: f32,
}

impl TemplateConfig {
    pub fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    pub template_id: i64,
    pub elements: Vec<Element>,
    pub config: TemplateConfig,
    #[serde(default)]
    pub show_debug_borders: bool,
    #[serde(default = "default_render_scale")]
    pub render_scale: f32,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_render_scale() -> f32 {
    1.0
}

impl RenderRequest {
    pub fn new(template_id: i64, elements: Vec<Element>, config: TemplateConfig) -> Self {
        Self {
            template_id,
            elements,
            config,
            show_debug_borders: false,
            render_scale: default_render_scale(),
            timeout_ms: None,
        }
    }

    pub fn with_render_scale(mut self, scale: f32) -> Self {
        self.render_scale = scale;
        self
    }

    pub fn with_debug_borders(mut self, enabled: bool) -> Self {
        self.show_debug_borders = enabled;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn from_json(json: &str) -> Result<Self, RasterError> {
        let request: RenderRequest = serde_json::from_str(json)?;
        request.validate()?;
        Ok(request)
    }

    pub fn validate(&self) -> Result<(), RasterError> {
        let scale = self.render_scale;
        if !scale.is_finite() || !(MIN_RENDER_SCALE..=MAX_RENDER_SCALE).contains(&scale) {
            return Err(RasterError::InvalidConfiguration(format!(
                "render scale {scale} outside {MIN_RENDER_SCALE}..={MAX_RENDER_SCALE}"
            )));
        }
        let TemplateConfig { width, height } = self.config;
        if !width.is_finite() || !height.is_finite() || width <= 0.0 || height <= 0.0 {
            return Err(RasterError::InvalidConfiguration(format!(
                "invalid canvas size {width}x{height}"
            )));
        }
        Ok(())
    }

    /// Distinct font families referenced by text elements, in first-seen order.
    pub fn font_families(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for element in &self.elements {
            if let Element::Text(text) = element {
                if !out.iter().any(|family| family == &text.font_family) {
                    out.push(text.font_family.clone());
                }
            }
        }
        out
    }
}
