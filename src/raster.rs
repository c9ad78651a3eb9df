use crate::element::{
    Element, FitMode, HorizontalAnchor, ImageElement, TextElement, VerticalPlacement,
};
use crate::glyph::{glyph_paths, layout_glyphs};
use crate::layout::{TextMeasure, layout_text};
use crate::pipeline::RenderResources;
use crate::types::{Color, Rect};
use std::ops::{Deref, DerefMut};
use tiny_skia::{
    FillRule, FilterQuality, Mask, Paint, Path, PathBuilder, Pixmap, PixmapPaint, Stroke,
    Transform,
};

const DEBUG_BORDER_WIDTH: f32 = 1.0;

#[derive(Clone)]
struct DrawState {
    transform: Transform,
    clip_mask: Option<Mask>,
}

/// The backing store plus the transform/clip state threaded through element drawing.
pub(crate) struct DrawContext<'a> {
    pixmap: &'a mut Pixmap,
    state: DrawState,
    stack: Vec<DrawState>,
}

impl<'a> DrawContext<'a> {
    pub(crate) fn new(pixmap: &'a mut Pixmap, transform: Transform) -> Self {
        Self {
            pixmap,
            state: DrawState {
                transform,
                clip_mask: None,
            },
            stack: Vec::new(),
        }
    }

    /// Pushes the current state; it is restored when the returned scope drops.
    pub(crate) fn save(&mut self) -> SavedState<'_, 'a> {
        self.stack.push(self.state.clone());
        let depth = self.stack.len();
        SavedState { ctx: self, depth }
    }

    fn restore(&mut self) {
        if let Some(restored) = self.stack.pop() {
            self.state = restored;
        }
    }

    pub(crate) fn depth(&self) -> usize {
        self.stack.len()
    }

    pub(crate) fn has_clip(&self) -> bool {
        self.state.clip_mask.is_some()
    }

    pub(crate) fn clip_rect(&mut self, rect: Rect) {
        let Some(sk_rect) = rect.to_sk_rect() else {
            return;
        };
        let path = PathBuilder::from_rect(sk_rect);
        let transform = self.state.transform;
        if let Some(mask) = self.state.clip_mask.as_mut() {
            mask.intersect_path(&path, FillRule::Winding, true, transform);
            return;
        }
        let Some(mut mask) = Mask::new(self.pixmap.width(), self.pixmap.height()) else {
            return;
        };
        mask.fill_path(&path, FillRule::Winding, true, transform);
        self.state.clip_mask = Some(mask);
    }

    fn fill_path(&mut self, path: &Path, color: Color) {
        let paint = fill_paint(color);
        self.pixmap.fill_path(
            path,
            &paint,
            FillRule::Winding,
            self.state.transform,
            self.state.clip_mask.as_ref(),
        );
    }

    fn stroke_rect(&mut self, rect: Rect, color: Color, width: f32) {
        let Some(sk_rect) = rect.to_sk_rect() else {
            return;
        };
        let path = PathBuilder::from_rect(sk_rect);
        let paint = fill_paint(color);
        let stroke = Stroke {
            width,
            ..Stroke::default()
        };
        self.pixmap.stroke_path(
            &path,
            &paint,
            &stroke,
            self.state.transform,
            self.state.clip_mask.as_ref(),
        );
    }

    /// Draws `image` stretched onto `dest` (user space).
    fn draw_image(&mut self, image: &Pixmap, dest: Rect) {
        let src_w = image.width() as f32;
        let src_h = image.height() as f32;
        if src_w <= 0.0 || src_h <= 0.0 || dest.width <= 0.0 || dest.height <= 0.0 {
            return;
        }
        let image_ts = Transform::from_row(
            dest.width / src_w,
            0.0,
            0.0,
            dest.height / src_h,
            dest.x,
            dest.y,
        );
        let paint = PixmapPaint {
            quality: FilterQuality::Bilinear,
            ..PixmapPaint::default()
        };
        self.pixmap.draw_pixmap(
            0,
            0,
            image.as_ref(),
            &paint,
            self.state.transform.pre_concat(image_ts),
            self.state.clip_mask.as_ref(),
        );
    }
}

pub(crate) struct SavedState<'c, 'a> {
    ctx: &'c mut DrawContext<'a>,
    depth: usize,
}

impl<'a> Deref for SavedState<'_, 'a> {
    type Target = DrawContext<'a>;

    fn deref(&self) -> &Self::Target {
        self.ctx
    }
}

impl DerefMut for SavedState<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.ctx
    }
}

impl Drop for SavedState<'_, '_> {
    fn drop(&mut self) {
        while self.ctx.stack.len() >= self.depth {
            self.ctx.restore();
        }
    }
}

/// Size and offset (relative to the element box) of a fitted image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitPlacement {
    pub width: f32,
    pub height: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub clip: bool,
}

pub fn fit_image(fit: FitMode, src_width: f32, src_height: f32, bounds: Rect) -> FitPlacement {
    match fit {
        FitMode::Fill => FitPlacement {
            width: bounds.width,
            height: bounds.height,
            offset_x: 0.0,
            offset_y: 0.0,
            clip: false,
        },
        FitMode::Contain | FitMode::Cover => {
            let sx = bounds.width / src_width;
            let sy = bounds.height / src_height;
            let scale = if fit == FitMode::Contain {
                sx.min(sy)
            } else {
                sx.max(sy)
            };
            let width = src_width * scale;
            let height = src_height * scale;
            FitPlacement {
                width,
                height,
                offset_x: (bounds.width - width) / 2.0,
                offset_y: (bounds.height - height) / 2.0,
                clip: fit == FitMode::Cover,
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DrawResult {
    Drawn,
    Hidden,
    MissingImage,
}

/// Draws one element inside its own saved scope; hidden elements are skipped
/// before anything else.
pub(crate) fn draw_element(
    ctx: &mut DrawContext<'_>,
    element: &Element,
    resources: &RenderResources,
    show_debug_borders: bool,
) -> DrawResult {
    if element.is_hidden() {
        return DrawResult::Hidden;
    }
    let result = {
        let mut scope = ctx.save();
        match element {
            Element::Text(text) => {
                draw_text(&mut scope, text, resources);
                DrawResult::Drawn
            }
            Element::Image(image) => draw_image_element(&mut scope, image, resources),
        }
    };
    if show_debug_borders {
        let mut scope = ctx.save();
        scope.stroke_rect(element.bounds(), Color::DEBUG_BORDER, DEBUG_BORDER_WIDTH);
    }
    result
}

fn draw_image_element(
    ctx: &mut DrawContext<'_>,
    element: &ImageElement,
    resources: &RenderResources,
) -> DrawResult {
    let Some(image) = resources.images.get(element.image_url.trim()) else {
        log::trace!(
            target: "certraster::raster",
            "element {} has no decoded image for {}",
            element.base.id,
            element.image_url
        );
        return DrawResult::MissingImage;
    };
    let bounds = element.base.bounds();
    if image.width() == 0 || image.height() == 0 {
        return DrawResult::MissingImage;
    }
    let placement = fit_image(
        element.fit,
        image.width() as f32,
        image.height() as f32,
        bounds,
    );
    if placement.clip {
        ctx.clip_rect(bounds);
    }
    ctx.draw_image(
        image,
        Rect::new(
            bounds.x + placement.offset_x,
            bounds.y + placement.offset_y,
            placement.width,
            placement.height,
        ),
    );
    DrawResult::Drawn
}

fn draw_text(ctx: &mut DrawContext<'_>, element: &TextElement, resources: &RenderResources) {
    let bounds = element.base.bounds();
    let measure = resources.measure_for(&element.font_family);
    let layout = layout_text(
        &measure,
        &element.text,
        bounds.width,
        bounds.height,
        element.font_size,
        element.layout,
    );
    if layout.lines.is_empty() {
        return;
    }

    let block_top = match element.alignment.vertical() {
        VerticalPlacement::Top => bounds.y,
        VerticalPlacement::Center => bounds.y + (bounds.height - layout.total_height) / 2.0,
        VerticalPlacement::Bottom => bounds.y + (bounds.height - layout.total_height),
    };

    let Some(face) = measure.face() else {
        log::trace!(
            target: "certraster::raster",
            "element {} has no face for '{}'; glyphs skipped",
            element.base.id,
            element.font_family
        );
        return;
    };

    let color = element.fill_color();
    for (index, line) in layout.lines.iter().enumerate() {
        let line_width = measure.width(line, layout.font_size);
        let x = match element.alignment.horizontal() {
            HorizontalAnchor::Start => bounds.x,
            HorizontalAnchor::Center => bounds.x + (bounds.width - line_width) / 2.0,
            HorizontalAnchor::End => bounds.right() - line_width,
        };
        let baseline_y = block_top + index as f32 * layout.line_height + layout.baseline_offset;
        let (placements, _) = layout_glyphs(face.data(), line, layout.font_size, x, baseline_y);
        for path in glyph_paths(face.data(), &placements) {
            ctx.fill_path(&path, color);
        }
    }
}

fn fill_paint(color: Color) -> Paint<'static> {
    let mut paint = Paint::default();
    paint.set_color(color.to_sk_color());
    paint.anti_alias = true;
    paint
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::{Alignment, ElementBase};
    use crate::font::FaceSet;
    use crate::font::tests::dejavu;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Pixmap {
        let mut pixmap = Pixmap::new(width, height).unwrap();
        pixmap.fill(tiny_skia::Color::from_rgba8(rgba[0], rgba[1], rgba[2], rgba[3]));
        pixmap
    }

    fn resources_with(url: &str, image: Pixmap) -> RenderResources {
        let mut images = HashMap::new();
        images.insert(url.to_string(), Arc::new(image));
        RenderResources::new(FaceSet::default(), HashMap::new(), images)
    }

    fn rgba_at(pixmap: &Pixmap, x: u32, y: u32) -> [u8; 4] {
        let px = pixmap.pixel(x, y).unwrap().demultiply();
        [px.red(), px.green(), px.blue(), px.alpha()]
    }

    fn text_resources() -> RenderResources {
        let mut faces = FaceSet::default();
        faces.insert("DejaVu Sans", dejavu());
        RenderResources::new(faces, HashMap::new(), HashMap::new())
    }

    fn text_element(text: &str, width: f32, height: f32, alignment: Alignment) -> Element {
        let mut element =
            TextElement::new(ElementBase::new(1, 0.0, 0.0, width, height), text, "DejaVu Sans", 20.0);
        element.alignment = alignment;
        Element::Text(element)
    }

    fn paint_text(element: &Element, resources: &RenderResources) -> Pixmap {
        let mut pixmap = Pixmap::new(200, 100).unwrap();
        let mut ctx = DrawContext::new(&mut pixmap, Transform::identity());
        draw_element(&mut ctx, element, resources, false);
        drop(ctx);
        pixmap
    }

    /// Inclusive (min_x, min_y, max_x, max_y) of every pixel with any coverage.
    fn painted_bounds(pixmap: &Pixmap) -> Option<(u32, u32, u32, u32)> {
        let mut bounds: Option<(u32, u32, u32, u32)> = None;
        for y in 0..pixmap.height() {
            for x in 0..pixmap.width() {
                if pixmap.pixel(x, y).is_some_and(|px| px.alpha() > 0) {
                    bounds = Some(match bounds {
                        None => (x, y, x, y),
                        Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                    });
                }
            }
        }
        bounds
    }

    #[test]
    fn top_start_text_hugs_the_top_left_corner() {
        let pixmap = paint_text(
            &text_element("Hello", 200.0, 100.0, Alignment::TopStart),
            &text_resources(),
        );
        let (x0, y0, x1, y1) = painted_bounds(&pixmap).unwrap();
        assert!(x0 <= 4, "{x0}");
        assert!(y0 <= 6, "{y0}");
        assert!((40..=60).contains(&x1), "{x1}");
        assert!((12..=24).contains(&y1), "{y1}");
    }

    #[test]
    fn centered_text_is_centered_in_its_box() {
        let pixmap = paint_text(
            &text_element("Hello", 200.0, 100.0, Alignment::Center),
            &text_resources(),
        );
        let (x0, y0, x1, y1) = painted_bounds(&pixmap).unwrap();
        let center_x = (x0 + x1) as f32 / 2.0;
        let center_y = (y0 + y1) as f32 / 2.0;
        assert!((center_x - 100.0).abs() <= 3.0, "{center_x}");
        assert!((center_y - 50.0).abs() <= 4.0, "{center_y}");
    }

    #[test]
    fn bottom_end_and_baseline_text_sit_on_the_bottom_edge() {
        let resources = text_resources();
        let end = painted_bounds(&paint_text(
            &text_element("Hello", 200.0, 100.0, Alignment::BottomEnd),
            &resources,
        ))
        .unwrap();
        assert!((194..=199).contains(&end.2), "{end:?}");
        assert!((88..=99).contains(&end.3), "{end:?}");

        let centered = painted_bounds(&paint_text(
            &text_element("Hello", 200.0, 100.0, Alignment::Center),
            &resources,
        ))
        .unwrap();
        let baseline = painted_bounds(&paint_text(
            &text_element("Hello", 200.0, 100.0, Alignment::BaselineCenter),
            &resources,
        ))
        .unwrap();
        assert_eq!((baseline.1, baseline.3), (end.1, end.3));
        assert_eq!((baseline.0, baseline.2), (centered.0, centered.2));
    }

    #[test]
    fn wrapped_lines_step_by_the_font_line_height() {
        let resources = text_resources();
        let single = painted_bounds(&paint_text(
            &text_element("Hello", 80.0, 100.0, Alignment::TopStart),
            &resources,
        ))
        .unwrap();
        let double = painted_bounds(&paint_text(
            &text_element("Hello Hello", 80.0, 100.0, Alignment::TopStart),
            &resources,
        ))
        .unwrap();
        let line_height = dejavu().metrics().line_height(20.0);
        let single_height = (single.3 - single.1) as f32;
        let double_height = (double.3 - double.1) as f32;
        assert_eq!(double.1, single.1);
        assert!(
            (double_height - single_height - line_height).abs() <= 1.5,
            "{double_height} vs {single_height} + {line_height}"
        );
        assert!(double.2 < 80);
    }

    #[test]
    fn text_is_filled_with_its_color() {
        let mut element = TextElement::new(
            ElementBase::new(1, 0.0, 0.0, 200.0, 100.0),
            "H",
            "DejaVu Sans",
            60.0,
        );
        element.color = "#ff0000".to_string();
        element.alignment = Alignment::Center;
        let pixmap = paint_text(&Element::Text(element), &text_resources());
        let opaque: Vec<[u8; 4]> = (0..pixmap.height())
            .flat_map(|y| (0..pixmap.width()).map(move |x| (x, y)))
            .map(|(x, y)| rgba_at(&pixmap, x, y))
            .filter(|px| px[3] == 255)
            .collect();
        assert!(!opaque.is_empty());
        assert!(opaque.iter().all(|px| *px == [255, 0, 0, 255]));
    }

    #[test]
    fn hidden_text_with_a_real_face_paints_nothing() {
        let resources = text_resources();
        let mut element = text_element("Hello", 200.0, 100.0, Alignment::Center);
        assert!(painted_bounds(&paint_text(&element, &resources)).is_some());

        element.base_mut().hidden = true;
        let mut pixmap = Pixmap::new(200, 100).unwrap();
        let mut ctx = DrawContext::new(&mut pixmap, Transform::identity());
        assert_eq!(
            draw_element(&mut ctx, &element, &resources, true),
            DrawResult::Hidden
        );
        drop(ctx);
        assert_eq!(painted_bounds(&pixmap), None);
    }

    #[test]
    fn cover_scales_to_fill_and_crops() {
        let placement = fit_image(FitMode::Cover, 200.0, 50.0, Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(placement.width, 400.0);
        assert_eq!(placement.height, 100.0);
        assert_eq!(placement.offset_x, -150.0);
        assert_eq!(placement.offset_y, 0.0);
        assert!(placement.clip);
    }

    #[test]
    fn contain_letterboxes_without_cropping() {
        let placement =
            fit_image(FitMode::Contain, 200.0, 50.0, Rect::new(0.0, 0.0, 100.0, 100.0));
        assert_eq!(placement.width, 100.0);
        assert_eq!(placement.height, 25.0);
        assert_eq!(placement.offset_y, 37.5);
        assert!(!placement.clip);
    }

    #[test]
    fn fill_stretches_each_axis() {
        let placement = fit_image(FitMode::Fill, 200.0, 50.0, Rect::new(5.0, 5.0, 30.0, 90.0));
        assert_eq!((placement.width, placement.height), (30.0, 90.0));
        assert_eq!((placement.offset_x, placement.offset_y), (0.0, 0.0));
    }

    #[test]
    fn saved_scope_restores_clip_on_drop() {
        let mut pixmap = Pixmap::new(20, 20).unwrap();
        let mut ctx = DrawContext::new(&mut pixmap, Transform::identity());
        {
            let mut scope = ctx.save();
            scope.clip_rect(Rect::new(0.0, 0.0, 5.0, 5.0));
            assert!(scope.has_clip());
            let mut nested = scope.save();
            nested.clip_rect(Rect::new(1.0, 1.0, 2.0, 2.0));
            assert_eq!(nested.depth(), 2);
        }
        assert_eq!(ctx.depth(), 0);
        assert!(!ctx.has_clip());
    }

    #[test]
    fn cover_image_stays_inside_its_box() {
        let resources = resources_with("red.png", solid(200, 50, [255, 0, 0, 255]));
        let element = Element::Image(ImageElement::new(
            ElementBase::new(1, 50.0, 50.0, 100.0, 100.0),
            "red.png",
            FitMode::Cover,
        ));
        let mut pixmap = Pixmap::new(200, 200).unwrap();
        let mut ctx = DrawContext::new(&mut pixmap, Transform::identity());
        assert_eq!(
            draw_element(&mut ctx, &element, &resources, false),
            DrawResult::Drawn
        );
        assert!(!ctx.has_clip());
        drop(ctx);
        assert_eq!(rgba_at(&pixmap, 100, 100), [255, 0, 0, 255]);
        assert_eq!(rgba_at(&pixmap, 55, 52), [255, 0, 0, 255]);
        assert_eq!(rgba_at(&pixmap, 20, 100)[3], 0);
        assert_eq!(rgba_at(&pixmap, 180, 100)[3], 0);
    }

    #[test]
    fn contain_image_leaves_letterbox_empty() {
        let resources = resources_with("blue.png", solid(200, 50, [0, 0, 255, 255]));
        let element = Element::Image(ImageElement::new(
            ElementBase::new(1, 0.0, 0.0, 100.0, 100.0),
            "blue.png",
            FitMode::Contain,
        ));
        let mut pixmap = Pixmap::new(100, 100).unwrap();
        let mut ctx = DrawContext::new(&mut pixmap, Transform::identity());
        draw_element(&mut ctx, &element, &resources, false);
        drop(ctx);
        assert_eq!(rgba_at(&pixmap, 50, 50), [0, 0, 255, 255]);
        assert_eq!(rgba_at(&pixmap, 50, 10)[3], 0);
        assert_eq!(rgba_at(&pixmap, 50, 90)[3], 0);
    }

    #[test]
    fn hidden_elements_paint_nothing() {
        let resources = resources_with("red.png", solid(4, 4, [255, 0, 0, 255]));
        let mut base = ElementBase::new(1, 0.0, 0.0, 10.0, 10.0);
        base.hidden = true;
        let image = Element::Image(ImageElement::new(base.clone(), "red.png", FitMode::Fill));
        let text = Element::Text(TextElement::new(base, "Hidden", "Any", 8.0));
        let mut pixmap = Pixmap::new(10, 10).unwrap();
        let mut ctx = DrawContext::new(&mut pixmap, Transform::identity());
        assert_eq!(draw_element(&mut ctx, &image, &resources, true), DrawResult::Hidden);
        assert_eq!(draw_element(&mut ctx, &text, &resources, true), DrawResult::Hidden);
        drop(ctx);
        assert!(pixmap.pixels().iter().all(|px| px.alpha() == 0));
    }

    #[test]
    fn missing_image_leaves_region_blank_but_keeps_debug_border() {
        let resources = RenderResources::new(FaceSet::default(), HashMap::new(), HashMap::new());
        let element = Element::Image(ImageElement::new(
            ElementBase::new(1, 10.0, 10.0, 20.0, 20.0),
            "missing.png",
            FitMode::Fill,
        ));
        let mut pixmap = Pixmap::new(40, 40).unwrap();
        let mut ctx = DrawContext::new(&mut pixmap, Transform::identity());
        assert_eq!(
            draw_element(&mut ctx, &element, &resources, true),
            DrawResult::MissingImage
        );
        drop(ctx);
        assert_eq!(rgba_at(&pixmap, 20, 20)[3], 0);
        let border = rgba_at(&pixmap, 20, 10);
        assert!(border[0] > 0 && border[3] > 0, "{border:?}");
    }
}
