// render.rs: Turns a raw classifier response into what the UI draws:
// threshold filter, stable sort, pixel geometry and caption strings.
//
// Nothing here draws. Overlay painting belongs to the `EventSink`.

use serde::{Deserialize, Serialize};

use crate::ai::{BoundingBox, Detection};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortKey {
    #[default]
    Confidence,
    Label,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Ascending,
    #[default]
    Descending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SortSpec {
    pub key: SortKey,
    pub order: SortOrder,
}

/// Bounding box scaled to frame pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PixelRect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl PixelRect {
    pub fn from_normalized(bb: &BoundingBox, frame_width: u32, frame_height: u32) -> Self {
        let fw = frame_width as f64;
        let fh = frame_height as f64;
        Self {
            x: bb.left * fw,
            y: bb.top * fh,
            w: bb.width * fw,
            h: bb.height * fh,
        }
    }

    /// Where the caption goes: just above the box, or inside it when the box
    /// touches the top edge.
    pub fn caption_anchor(&self) -> (f64, f64) {
        let y = if self.y > 10.0 { self.y - 5.0 } else { self.y + 15.0 };
        (self.x, y)
    }
}

/// A detection that survived filtering, with everything needed to draw it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedDetection {
    pub detection: Detection,
    pub rect: Option<PixelRect>,
    /// `"{label} ({pct:.2}%)"`, drawn next to the box.
    pub caption: String,
}

impl RenderedDetection {
    pub fn new(detection: Detection, frame_width: u32, frame_height: u32) -> Self {
        let rect = detection
            .bounding_box
            .as_ref()
            .map(|bb| PixelRect::from_normalized(bb, frame_width, frame_height));
        let caption = format!("{} ({:.2}%)", detection.label, detection.percent());
        Self {
            detection,
            rect,
            caption,
        }
    }

    /// `"{label}: {pct:.2}%"`, one line of the results list.
    pub fn summary_line(&self) -> String {
        format!("{}: {:.2}%", self.detection.label, self.detection.percent())
    }
}

/// Drop everything below `min_confidence` (0–100 scale), keep the rest in
/// response order.
pub fn filter_by_confidence(detections: Vec<Detection>, min_confidence: f64) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| d.percent() >= min_confidence)
        .collect()
}

/// Stable sort: ties keep response order in either direction.
pub fn sort_detections(detections: &mut [Detection], spec: SortSpec) {
    detections.sort_by(|a, b| {
        let ord = match spec.key {
            SortKey::Confidence => a.confidence.total_cmp(&b.confidence),
            SortKey::Label => a.label.cmp(&b.label),
        };
        match spec.order {
            SortOrder::Ascending => ord,
            SortOrder::Descending => ord.reverse(),
        }
    });
}

/// Filter, sort and scale one classifier response for a `frame_width` x
/// `frame_height` frame.
pub fn prepare(
    detections: Vec<Detection>,
    min_confidence: f64,
    sort: SortSpec,
    frame_width: u32,
    frame_height: u32,
) -> Vec<RenderedDetection> {
    let mut kept = filter_by_confidence(detections, min_confidence);
    sort_detections(&mut kept, sort);
    kept.into_iter()
        .map(|d| RenderedDetection::new(d, frame_width, frame_height))
        .collect()
}

/// The results-list text block, one line per detection.
pub fn summary_text(rendered: &[RenderedDetection]) -> String {
    rendered
        .iter()
        .map(RenderedDetection::summary_line)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    fn is_sorted_by(items: &[RenderedDetection], spec: SortSpec) -> bool {
        items.windows(2).all(|w| {
            let (a, b) = (&w[0].detection, &w[1].detection);
            let ord = match spec.key {
                SortKey::Confidence => a.confidence.total_cmp(&b.confidence),
                SortKey::Label => a.label.cmp(&b.label),
            };
            match spec.order {
                SortOrder::Ascending => ord != Ordering::Greater,
                SortOrder::Descending => ord != Ordering::Less,
            }
        })
    }

    fn det(label: &str, confidence: f64) -> Detection {
        Detection::new(label, confidence)
    }

    #[test]
    fn threshold_scenario_cat_and_dog() {
        let out = prepare(
            vec![det("cat", 0.95), det("dog", 0.5)],
            80.0,
            SortSpec::default(),
            640,
            480,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].detection.label, "cat");
    }

    #[test]
    fn threshold_is_inclusive() {
        let kept = filter_by_confidence(vec![det("a", 0.5), det("b", 0.49)], 50.0);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].label, "a");
    }

    #[test]
    fn threshold_holds_for_every_value() {
        let raw: Vec<Detection> = (0..=20).map(|i| det("x", i as f64 / 20.0)).collect();
        for min in 0..=100 {
            let min = min as f64;
            for d in filter_by_confidence(raw.clone(), min) {
                assert!(d.percent() >= min, "{} < {}", d.percent(), min);
            }
        }
    }

    #[test]
    fn zero_threshold_keeps_everything() {
        let raw = vec![det("a", 0.0), det("b", 0.3)];
        assert_eq!(filter_by_confidence(raw, 0.0).len(), 2);
    }

    #[test]
    fn default_sort_is_confidence_descending() {
        let mut v = vec![det("a", 0.2), det("b", 0.9), det("c", 0.5)];
        sort_detections(&mut v, SortSpec::default());
        let labels: Vec<_> = v.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["b", "c", "a"]);
    }

    #[test]
    fn ties_keep_response_order_both_directions() {
        let raw = vec![det("first", 0.7), det("second", 0.7), det("third", 0.1)];
        for order in [SortOrder::Ascending, SortOrder::Descending] {
            let mut v = raw.clone();
            sort_detections(
                &mut v,
                SortSpec {
                    key: SortKey::Confidence,
                    order,
                },
            );
            let tied: Vec<_> = v
                .iter()
                .filter(|d| d.confidence == 0.7)
                .map(|d| d.label.as_str())
                .collect();
            assert_eq!(tied, vec!["first", "second"], "{:?}", order);
        }
    }

    #[test]
    fn label_sort() {
        let mut v = vec![det("zebra", 0.1), det("ant", 0.2), det("moth", 0.3)];
        let spec = SortSpec {
            key: SortKey::Label,
            order: SortOrder::Ascending,
        };
        sort_detections(&mut v, spec);
        let labels: Vec<_> = v.iter().map(|d| d.label.as_str()).collect();
        assert_eq!(labels, vec!["ant", "moth", "zebra"]);

        let rendered = prepare(v, 0.0, spec, 1, 1);
        assert!(is_sorted_by(&rendered, spec));
        assert!(!is_sorted_by(
            &rendered,
            SortSpec {
                key: SortKey::Label,
                order: SortOrder::Descending
            }
        ));
    }

    #[test]
    fn geometry_and_captions() {
        let d = det("helmet", 0.97123).with_box(BoundingBox::new(0.25, 0.5, 0.5, 0.25));
        let r = RenderedDetection::new(d, 640, 480);
        assert_eq!(
            r.rect,
            Some(PixelRect {
                x: 160.0,
                y: 240.0,
                w: 320.0,
                h: 120.0
            })
        );
        assert_eq!(r.caption, "helmet (97.12%)");
        assert_eq!(r.summary_line(), "helmet: 97.12%");
        assert_eq!(r.rect.unwrap().caption_anchor(), (160.0, 235.0));
    }

    #[test]
    fn caption_drops_inside_box_at_top_edge() {
        let rect = PixelRect {
            x: 4.0,
            y: 2.0,
            w: 10.0,
            h: 10.0,
        };
        assert_eq!(rect.caption_anchor(), (4.0, 17.0));
    }

    #[test]
    fn no_box_means_no_rect() {
        let r = RenderedDetection::new(det("Yes", 1.0), 640, 480);
        assert!(r.rect.is_none());
        assert_eq!(r.caption, "Yes (100.00%)");
    }

    #[test]
    fn summary_text_joins_lines() {
        let rendered = prepare(
            vec![det("a", 0.5), det("b", 0.25)],
            0.0,
            SortSpec::default(),
            1,
            1,
        );
        assert_eq!(summary_text(&rendered), "a: 50.00%\nb: 25.00%");
    }
}
