//! Highlight rendering over raw document text
//!
//! Rendering is a pure function of `(raw text, annotations)`. Offsets always
//! refer to the raw text, never to the decorated output, so a rendered copy
//! can be thrown away and rebuilt at any time.
//!
//! # Overlaps
//!
//! Annotations are put in *application order*: a stable sort by
//! `startIndex` descending. Where ranges overlap, the annotation applied
//! earlier wraps the one applied later, so the last-applied annotation is
//! the innermost mark and renders on top. Marks that would cross are split
//! and reopened; every fragment carries the same `data-annotation-id`.
//!
//! ```text
//! A=[0,5)  B=[3,8)  on "abcdefgh"
//! application order: B, A
//! <A>abc</A><B><A>de</A>fgh</B>
//! ```

use std::collections::BTreeSet;

use crate::annotations::Annotation;
use crate::range::char_len;

/// Configuration for highlight rendering
#[derive(Debug, Clone)]
pub struct HighlightConfig {
    /// CSS class put on every mark
    pub class_name: String,
    /// Hex alpha suffix appended to the author color
    pub alpha: String,
    /// Emit `background-color`/`cursor` inline styles
    pub include_inline_styles: bool,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            class_name: "annotation-highlight".to_string(),
            alpha: "40".to_string(),
            include_inline_styles: true,
        }
    }
}

/// Result of rendering
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDocument {
    /// Escaped text with `<mark>` elements
    pub html: String,
    /// Annotations that produced at least one mark
    pub marked: usize,
    /// IDs of annotations whose range does not fit the text
    pub skipped: Vec<String>,
    /// Byte position in `html` where each raw character starts
    char_positions: Vec<usize>,
}

impl RenderedDocument {
    /// Map a byte position in `html` back to a raw character offset.
    ///
    /// Positions inside markup resolve to the next raw character, so a
    /// selection made on the rendered output can be expressed in raw
    /// offsets without knowing which marks were present.
    pub fn raw_offset_at(&self, html_pos: usize) -> usize {
        self.char_positions.partition_point(|&pos| pos < html_pos)
    }

    /// Byte position in `html` where raw character `offset` starts
    pub fn html_position_of(&self, offset: usize) -> Option<usize> {
        self.char_positions.get(offset).copied()
    }
}

/// Stable back-to-front order: highest start offset first
pub fn application_order(annotations: &[Annotation]) -> Vec<&Annotation> {
    let mut ordered: Vec<&Annotation> = annotations.iter().collect();
    ordered.sort_by(|a, b| b.start_index.cmp(&a.start_index));
    ordered
}

/// Render `raw` with every valid annotation marked
pub fn render_highlights(
    raw: &str,
    annotations: &[Annotation],
    config: &HighlightConfig,
) -> RenderedDocument {
    let len = char_len(raw);

    let mut skipped = Vec::new();
    let applied: Vec<&Annotation> = application_order(annotations)
        .into_iter()
        .filter(|a| {
            let fits = a.range().validate_against(raw).is_ok();
            if !fits {
                tracing::debug!(annotation_id = %a.id, len, "Skipping annotation outside text");
                skipped.push(a.id.clone());
            }
            fits
        })
        .collect();

    let mut boundaries: BTreeSet<usize> = BTreeSet::new();
    boundaries.insert(0);
    boundaries.insert(len);
    for a in &applied {
        boundaries.insert(a.start_index);
        boundaries.insert(a.end_index);
    }
    let boundaries: Vec<usize> = boundaries.into_iter().collect();

    let chars: Vec<char> = raw.chars().collect();
    let mut html = String::with_capacity(raw.len() + applied.len() * 96);
    let mut char_positions = Vec::with_capacity(len);
    let mut marked = vec![false; applied.len()];

    // Indices into `applied`, outermost first
    let mut open: Vec<usize> = Vec::new();

    for window in boundaries.windows(2) {
        let (from, to) = (window[0], window[1]);

        let wanted: Vec<usize> = (0..applied.len())
            .filter(|&i| applied[i].start_index <= from && from < applied[i].end_index)
            .collect();

        let shared = open
            .iter()
            .zip(&wanted)
            .take_while(|(a, b)| a == b)
            .count();

        while open.len() > shared {
            open.pop();
            html.push_str("</mark>");
        }
        for &i in &wanted[shared..] {
            push_open_tag(&mut html, applied[i], config);
            marked[i] = true;
            open.push(i);
        }

        let mut buf = [0u8; 4];
        for c in &chars[from..to] {
            char_positions.push(html.len());
            html_escape::encode_text_to_string(c.encode_utf8(&mut buf), &mut html);
        }
    }

    for _ in open.drain(..) {
        html.push_str("</mark>");
    }

    RenderedDocument {
        html,
        marked: marked.iter().filter(|m| **m).count(),
        skipped,
        char_positions,
    }
}

fn push_open_tag(html: &mut String, annotation: &Annotation, config: &HighlightConfig) {
    html.push_str("<mark");
    if config.include_inline_styles {
        html.push_str(" style=\"background-color: ");
        html_escape::encode_double_quoted_attribute_to_string(&annotation.user_color, &mut *html);
        html_escape::encode_double_quoted_attribute_to_string(&config.alpha, &mut *html);
        html.push_str("; cursor: pointer;\"");
    }
    html.push_str(" data-annotation-id=\"");
    html_escape::encode_double_quoted_attribute_to_string(&annotation.id, &mut *html);
    html.push_str("\" data-author-id=\"");
    html_escape::encode_double_quoted_attribute_to_string(&annotation.user_id, &mut *html);
    html.push_str("\" class=\"");
    html_escape::encode_double_quoted_attribute_to_string(&config.class_name, &mut *html);
    html.push_str("\">");
}
