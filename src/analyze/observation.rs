//! Observation shapes produced by analysis requests.
//!
//! Each request yields one of three shapes, fixed by the external models:
//! a ranked label/confidence list, a quadrilateral (four 2-D points), or a
//! dense channels x height x width heatmap. Observations are consumed by the
//! request callback and discarded; nothing here is persisted.

use std::fmt;

use anyhow::{anyhow, Result};

/// One ranked classification entry.
#[derive(Clone, Debug, PartialEq)]
pub struct LabelScore {
    pub label: String,
    /// Confidence in 0..1.
    pub confidence: f32,
}

impl LabelScore {
    pub fn new(label: impl Into<String>, confidence: f32) -> Self {
        Self {
            label: label.into(),
            confidence,
        }
    }
}

/// A 2-D point in normalized image coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// A detected quadrilateral.
///
/// Corner order is fixed: topLeft, topRight, bottomLeft, bottomRight. The
/// rendered form keeps that order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quad {
    pub top_left: Point,
    pub top_right: Point,
    pub bottom_left: Point,
    pub bottom_right: Point,
}

impl Quad {
    /// Fixed-order textual rendering used by the rectangle callback log.
    pub fn describe(&self) -> String {
        format!(
            "topLeft={} topRight={} bottomLeft={} bottomRight={}",
            self.top_left, self.top_right, self.bottom_left, self.bottom_right
        )
    }
}

/// Dense per-channel confidence array of fixed shape.
///
/// Channel-major layout: index = (channel * height + y) * width + x.
#[derive(Clone, Debug, PartialEq)]
pub struct Heatmap {
    channels: usize,
    height: usize,
    width: usize,
    values: Vec<f32>,
}

impl Heatmap {
    pub fn from_values(channels: usize, height: usize, width: usize, values: Vec<f32>) -> Result<Self> {
        let expected = channels * height * width;
        if values.len() != expected {
            return Err(anyhow!(
                "heatmap shape {}x{}x{} needs {} values, received {}",
                channels,
                height,
                width,
                expected,
                values.len()
            ));
        }
        Ok(Self {
            channels,
            height,
            width,
            values,
        })
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn at(&self, channel: usize, y: usize, x: usize) -> f32 {
        self.values[(channel * self.height + y) * self.width + x]
    }

    /// Iterate every cell exactly once as (channel, y, x, value).
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, usize, f32)> + '_ {
        let (height, width) = (self.height, self.width);
        self.values.iter().enumerate().map(move |(idx, &value)| {
            let x = idx % width;
            let y = (idx / width) % height;
            let channel = idx / (width * height);
            (channel, y, x, value)
        })
    }
}

/// Result of one analysis request against one frame.
#[derive(Clone, Debug)]
pub enum Observation {
    /// Ranked label/confidence list; consumers keep the top 5 entries.
    Labels(Vec<LabelScore>),
    /// At most one detected quadrilateral; None when nothing was found.
    Rectangle(Option<Quad>),
    /// Dense pose heatmap.
    Heatmap(Heatmap),
}

/// Render the leading entries of a ranked label list, one per line, with the
/// confidence as a rounded percentage ("cat 91").
pub fn render_top_labels(labels: &[LabelScore], limit: usize) -> String {
    labels
        .iter()
        .take(limit)
        .map(|entry| format!("{} {}", entry.label, (entry.confidence * 100.0).round()))
        .collect::<Vec<_>>()
        .join("\n")
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn top_labels_keep_only_first_five_as_rounded_percentages() {
        let labels = vec![
            LabelScore::new("cat", 0.91),
            LabelScore::new("dog", 0.04),
            LabelScore::new("fox", 0.02),
            LabelScore::new("cow", 0.01),
            LabelScore::new("pig", 0.01),
            LabelScore::new("owl", 0.01),
        ];

        let rendered = render_top_labels(&labels, 5);
        assert_eq!(rendered, "cat 91\ndog 4\nfox 2\ncow 1\npig 1");
        assert!(!rendered.contains("owl"));
    }

    #[test]
    fn top_labels_handle_short_lists() {
        let labels = vec![LabelScore::new("cat", 1.0)];
        assert_eq!(render_top_labels(&labels, 5), "cat 100");
        assert_eq!(render_top_labels(&[], 5), "");
    }

    #[test]
    fn quad_renders_corners_in_fixed_order() {
        let quad = Quad {
            top_left: Point::new(0.0, 0.0),
            top_right: Point::new(1.0, 0.0),
            bottom_left: Point::new(0.0, 1.0),
            bottom_right: Point::new(1.0, 1.0),
        };

        assert_eq!(
            quad.describe(),
            "topLeft=(0, 0) topRight=(1, 0) bottomLeft=(0, 1) bottomRight=(1, 1)"
        );
    }

    #[test]
    fn heatmap_rejects_mismatched_value_count() {
        assert!(Heatmap::from_values(14, 48, 48, vec![0.0; 10]).is_err());
        assert!(Heatmap::from_values(14, 48, 48, vec![0.0; 14 * 48 * 48]).is_ok());
    }

    #[test]
    fn heatmap_iterates_every_cell_exactly_once() {
        // Declared 14x96x96: all 129,024 cells, no omission, no duplication.
        let (channels, height, width) = (14usize, 96usize, 96usize);
        let values: Vec<f32> = (0..channels * height * width).map(|i| i as f32).collect();
        let map = Heatmap::from_values(channels, height, width, values).unwrap();

        let mut count = 0usize;
        for (idx, (c, y, x, value)) in map.cells().enumerate() {
            // The flat enumeration index must match the declared layout.
            assert_eq!(idx, (c * height + y) * width + x);
            assert_eq!(value, idx as f32);
            count += 1;
        }
        assert_eq!(count, 129_024);
        assert_eq!(map.len(), 129_024);
    }

    #[test]
    fn heatmap_indexing_is_channel_major() {
        let values: Vec<f32> = (0..2 * 2 * 3).map(|i| i as f32).collect();
        let map = Heatmap::from_values(2, 2, 3, values).unwrap();

        assert_eq!(map.at(0, 0, 0), 0.0);
        assert_eq!(map.at(0, 1, 2), 5.0);
        assert_eq!(map.at(1, 0, 0), 6.0);
        assert_eq!(map.at(1, 1, 2), 11.0);
    }
}
