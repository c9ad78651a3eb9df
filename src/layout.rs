use crate::element::TextLayoutPolicy;

pub const ELLIPSIS: &str = "\u{2026}";
const SHRINK_STEP: f32 = 0.5;
const MIN_FONT_SIZE: f32 = 1.0;

/// Width and vertical metrics of text at a given font size.
pub trait TextMeasure {
    fn width(&self, text: &str, font_size: f32) -> f32;
    fn line_height(&self, font_size: f32) -> f32;
    fn baseline_offset(&self, font_size: f32) -> f32;
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextLayout {
    pub lines: Vec<String>,
    pub font_size: f32,
    pub line_height: f32,
    pub baseline_offset: f32,
    pub total_height: f32,
    pub policy: TextLayoutPolicy,
}

impl TextLayout {
    fn new(
        measure: &dyn TextMeasure,
        lines: Vec<String>,
        font_size: f32,
        policy: TextLayoutPolicy,
    ) -> Self {
        let line_height = measure.line_height(font_size);
        Self {
            total_height: lines.len() as f32 * line_height,
            baseline_offset: measure.baseline_offset(font_size),
            lines,
            font_size,
            line_height,
            policy,
        }
    }
}

/// Greedy word wrap. A word wider than `max_width` keeps a line to itself.
pub fn wrap(measure: &dyn TextMeasure, text: &str, max_width: f32, font_size: f32) -> TextLayout {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if current.is_empty() {
            current.push_str(word);
            continue;
        }
        let candidate = format!("{current} {word}");
        if measure.width(&candidate, font_size) <= max_width {
            current = candidate;
        } else {
            lines.push(std::mem::replace(&mut current, word.to_string()));
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    TextLayout::new(measure, lines, font_size, TextLayoutPolicy::Wrap)
}

/// Single line, cut to the longest character prefix that fits with an ellipsis.
/// Empty when not even the ellipsis fits.
pub fn truncate(
    measure: &dyn TextMeasure,
    text: &str,
    max_width: f32,
    font_size: f32,
) -> TextLayout {
    if measure.width(text, font_size) <= max_width {
        return TextLayout::new(
            measure,
            vec![text.to_string()],
            font_size,
            TextLayoutPolicy::Truncate,
        );
    }

    let chars: Vec<char> = text.chars().collect();
    let with_ellipsis = |len: usize| -> String {
        let mut out: String = chars[..len].iter().collect();
        out.push_str(ELLIPSIS);
        out
    };

    // Prefix width is monotonic in its length.
    let mut low = 0usize;
    let mut high = chars.len();
    while low < high {
        let mid = (low + high).div_ceil(2);
        if measure.width(&with_ellipsis(mid), font_size) <= max_width {
            low = mid;
        } else {
            high = mid - 1;
        }
    }

    let mut line = with_ellipsis(low);
    if low == 0 && measure.width(&line, font_size) > max_width {
        line.clear();
    }
    TextLayout::new(measure, vec![line], font_size, TextLayoutPolicy::Truncate)
}

/// Largest font size in `[1, base_font_size]` (0.5 steps) whose wrapped block fits
/// `max_height`. Falls back to the size-1 layout when nothing fits.
pub fn resize_down(
    measure: &dyn TextMeasure,
    text: &str,
    max_width: f32,
    max_height: f32,
    base_font_size: f32,
) -> TextLayout {
    let shrink = |layout: TextLayout| TextLayout {
        policy: TextLayoutPolicy::Shrink,
        ..layout
    };

    let base = base_font_size.max(MIN_FONT_SIZE);
    let at_base = wrap(measure, text, max_width, base);
    if at_base.total_height <= max_height {
        return shrink(at_base);
    }

    let mut low = MIN_FONT_SIZE;
    let mut high = base;
    let mut best: Option<TextLayout> = None;
    while low <= high {
        let mid = snap_to_step(low, high);
        let candidate = wrap(measure, text, max_width, mid);
        if candidate.total_height <= max_height {
            best = Some(candidate);
            low = mid + SHRINK_STEP;
        } else {
            high = mid - SHRINK_STEP;
        }
    }

    shrink(best.unwrap_or_else(|| wrap(measure, text, max_width, MIN_FONT_SIZE)))
}

// Midpoint rounded down onto the 0.5 grid; stays within [low, high] while low is on the grid.
fn snap_to_step(low: f32, high: f32) -> f32 {
    ((low + high) / (2.0 * SHRINK_STEP)).floor() * SHRINK_STEP
}

/// Applies the explicit policy, or picks one from the box: wrap when the wrapped
/// block fits, truncate for boxes shorter than two lines, shrink otherwise.
pub fn layout_text(
    measure: &dyn TextMeasure,
    text: &str,
    box_width: f32,
    box_height: f32,
    font_size: f32,
    policy: Option<TextLayoutPolicy>,
) -> TextLayout {
    match policy {
        Some(TextLayoutPolicy::Wrap) => wrap(measure, text, box_width, font_size),
        Some(TextLayoutPolicy::Truncate) => truncate(measure, text, box_width, font_size),
        Some(TextLayoutPolicy::Shrink) => {
            resize_down(measure, text, box_width, box_height, font_size)
        }
        None => {
            let wrapped = wrap(measure, text, box_width, font_size);
            if box_height <= 0.0 || wrapped.total_height <= box_height {
                wrapped
            } else if box_height < 2.0 * measure.line_height(font_size) {
                truncate(measure, text, box_width, font_size)
            } else {
                resize_down(measure, text, box_width, box_height, font_size)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every character advances `em` × font size.
    struct FixedMeasure {
        em: f32,
    }

    impl TextMeasure for FixedMeasure {
        fn width(&self, text: &str, font_size: f32) -> f32 {
            text.chars().count() as f32 * font_size * self.em
        }

        fn line_height(&self, font_size: f32) -> f32 {
            font_size * 1.2
        }

        fn baseline_offset(&self, font_size: f32) -> f32 {
            font_size * 0.8
        }
    }

    const SAMPLES: &[&str] = &[
        "Hello World",
        "Certificate of Completion awarded to",
        "a bb ccc dddd eeeee ffffff",
        "Supercalifragilisticexpialidocious is long",
        "x",
    ];

    #[test]
    fn wrap_breaks_hello_world() {
        let measure = FixedMeasure { em: 1.0 };
        let layout = wrap(&measure, "Hello World", 200.0, 20.0);
        assert_eq!(layout.lines, vec!["Hello".to_string(), "World".to_string()]);
        assert!((layout.total_height - 48.0).abs() < 1e-4);
        assert_eq!(layout.policy, TextLayoutPolicy::Wrap);
    }

    #[test]
    fn wrap_keeps_fitting_text_on_one_line() {
        let measure = FixedMeasure { em: 0.5 };
        let layout = wrap(&measure, "Hello   World", 200.0, 20.0);
        assert_eq!(layout.lines, vec!["Hello World".to_string()]);
    }

    #[test]
    fn wrap_of_blank_text_has_no_lines() {
        let measure = FixedMeasure { em: 0.5 };
        let layout = wrap(&measure, "   ", 100.0, 12.0);
        assert!(layout.lines.is_empty());
        assert_eq!(layout.total_height, 0.0);
    }

    #[test]
    fn wrap_lines_never_exceed_width_except_single_words() {
        let measure = FixedMeasure { em: 0.6 };
        for text in SAMPLES {
            for max_width in [10.0, 40.0, 75.0, 120.0, 300.0] {
                let layout = wrap(&measure, text, max_width, 12.0);
                for line in &layout.lines {
                    let fits = measure.width(line, 12.0) <= max_width;
                    let single_word = line.split_whitespace().count() == 1;
                    assert!(fits || single_word, "{line:?} overflows {max_width}");
                }
                let rejoined = layout.lines.join(" ");
                assert_eq!(rejoined, text.split_whitespace().collect::<Vec<_>>().join(" "));
            }
        }
    }

    #[test]
    fn truncate_returns_unchanged_text_that_fits() {
        let measure = FixedMeasure { em: 0.5 };
        let layout = truncate(&measure, "Short", 100.0, 10.0);
        assert_eq!(layout.lines, vec!["Short".to_string()]);
    }

    #[test]
    fn truncate_appends_ellipsis_to_longest_fitting_prefix() {
        let measure = FixedMeasure { em: 1.0 };
        let layout = truncate(&measure, "abcdefghij", 50.0, 10.0);
        assert_eq!(layout.lines, vec![format!("abcd{ELLIPSIS}")]);
    }

    #[test]
    fn truncate_output_is_one_line_within_width() {
        let measure = FixedMeasure { em: 0.55 };
        for text in SAMPLES {
            for max_width in [12.0, 30.0, 64.5, 150.0] {
                let layout = truncate(&measure, text, max_width, 14.0);
                assert_eq!(layout.lines.len(), 1);
                let line = &layout.lines[0];
                if line == text {
                    assert!(measure.width(text, 14.0) <= max_width);
                } else {
                    assert!(line.is_empty() || line.ends_with(ELLIPSIS));
                    assert!(measure.width(line, 14.0) <= max_width, "{line:?}");
                }
            }
        }
    }

    #[test]
    fn truncate_degrades_to_bare_ellipsis() {
        let measure = FixedMeasure { em: 1.0 };
        let layout = truncate(&measure, "abc", 15.0, 10.0);
        assert_eq!(layout.lines, vec![ELLIPSIS.to_string()]);
    }

    #[test]
    fn truncate_returns_empty_line_when_ellipsis_overflows() {
        let measure = FixedMeasure { em: 1.0 };
        let layout = truncate(&measure, "abc", 5.0, 10.0);
        assert_eq!(layout.lines, vec![String::new()]);
        assert!(measure.width(&layout.lines[0], 10.0) <= 5.0);
    }

    #[test]
    fn resize_down_fits_height() {
        let measure = FixedMeasure { em: 0.6 };
        for text in SAMPLES {
            let layout = resize_down(&measure, text, 120.0, 40.0, 32.0);
            assert!(layout.font_size <= 32.0 && layout.font_size >= 1.0);
            assert!(
                layout.total_height <= 40.0,
                "{text:?} at {} is {} tall",
                layout.font_size,
                layout.total_height
            );
            assert_eq!(layout.policy, TextLayoutPolicy::Shrink);
        }
    }

    #[test]
    fn resize_down_picks_largest_half_step() {
        let measure = FixedMeasure { em: 1.0 };
        // Two lines of five characters fit 100 wide up to size 20, and 2.4 × 12.5 ≤ 31.
        let layout = resize_down(&measure, "abcde fghij", 100.0, 31.0, 40.0);
        assert_eq!(layout.font_size, 12.5);
        assert_eq!(layout.lines.len(), 2);
    }

    #[test]
    fn resize_down_keeps_base_size_when_it_fits() {
        let measure = FixedMeasure { em: 0.5 };
        let layout = resize_down(&measure, "ok", 100.0, 100.0, 13.3);
        assert_eq!(layout.font_size, 13.3);
    }

    #[test]
    fn resize_down_returns_size_one_when_nothing_fits() {
        let measure = FixedMeasure { em: 1.0 };
        let layout = resize_down(&measure, "a b c d e f", 1.0, 2.0, 24.0);
        assert_eq!(layout.font_size, 1.0);
        assert!(layout.total_height > 2.0);
    }

    #[test]
    fn implied_policy_follows_box_constraints() {
        let measure = FixedMeasure { em: 1.0 };
        let fits = layout_text(&measure, "Hello World", 200.0, 100.0, 20.0, None);
        assert_eq!(fits.policy, TextLayoutPolicy::Wrap);

        let single_line_box = layout_text(&measure, "Hello World", 200.0, 30.0, 20.0, None);
        assert_eq!(single_line_box.policy, TextLayoutPolicy::Truncate);
        assert_eq!(single_line_box.lines.len(), 1);

        let tall_box = layout_text(&measure, "one two three four five", 100.0, 60.0, 20.0, None);
        assert_eq!(tall_box.policy, TextLayoutPolicy::Shrink);
        assert!(tall_box.total_height <= 60.0);
    }

    #[test]
    fn explicit_policy_wins() {
        let measure = FixedMeasure { em: 1.0 };
        let layout = layout_text(
            &measure,
            "Hello World",
            200.0,
            100.0,
            20.0,
            Some(TextLayoutPolicy::Truncate),
        );
        assert_eq!(layout.lines, vec![format!("Hello Wor{ELLIPSIS}")]);
    }
}
