//! Popup placement
//!
//! Pure geometry in logical screen coordinates with a top-left origin, the
//! same space `tao` reports monitor positions in.

use crate::data::PinnedFrame;

/// Gap between the status item and the popup's top edge
const ANCHOR_GAP: f64 = 4.0;
/// Top margin when there is no anchor to hang the popup from
const TOP_MARGIN: f64 = 32.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    fn right(&self) -> f64 {
        self.x + self.width
    }

    fn bottom(&self) -> f64 {
        self.y + self.height
    }

    fn center_x(&self) -> f64 {
        self.x + self.width / 2.0
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.bottom()
            && other.y < self.bottom()
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }
}

impl From<PinnedFrame> for Rect {
    fn from(frame: PinnedFrame) -> Self {
        Rect::new(frame.x, frame.y, frame.width, frame.height)
    }
}

impl From<Rect> for PinnedFrame {
    fn from(rect: Rect) -> Self {
        PinnedFrame {
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        }
    }
}

/// Keep `value..value+len` inside `lo..hi` where possible, favouring `lo`
fn clamp_span(value: f64, len: f64, lo: f64, hi: f64) -> f64 {
    value.min(hi - len).max(lo)
}

/// Where the popup goes when it is shown.
///
/// A pinned frame is used as-is while it still overlaps some monitor.
/// Otherwise the popup hangs centred under `anchor` (the status item),
/// clamped to the anchor's monitor. With neither, it is centred at the top
/// of the first monitor.
pub fn popup_frame(
    size: (f64, f64),
    pinned: Option<PinnedFrame>,
    anchor: Option<Rect>,
    monitors: &[Rect],
) -> Rect {
    if let Some(frame) = pinned.map(Rect::from) {
        if monitors.iter().any(|m| m.intersects(&frame)) {
            return frame;
        }
        tracing::debug!("Pinned frame {:?} is off-screen, ignoring", frame);
    }

    let (width, height) = size;

    if let Some(anchor) = anchor {
        let x = anchor.center_x() - width / 2.0;
        let y = anchor.bottom() + ANCHOR_GAP;
        let monitor = monitors
            .iter()
            .find(|m| m.contains(anchor.center_x(), anchor.y))
            .or_else(|| monitors.first());
        return match monitor {
            Some(m) => Rect::new(
                clamp_span(x, width, m.x, m.right()),
                clamp_span(y, height, m.y, m.bottom()),
                width,
                height,
            ),
            None => Rect::new(x, y, width, height),
        };
    }

    match monitors.first() {
        Some(m) => Rect::new(m.center_x() - width / 2.0, m.y + TOP_MARGIN, width, height),
        None => Rect::new(0.0, TOP_MARGIN, width, height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIZE: (f64, f64) = (400.0, 600.0);

    fn main_monitor() -> Rect {
        Rect::new(0.0, 0.0, 1440.0, 900.0)
    }

    fn second_monitor() -> Rect {
        Rect::new(1440.0, 0.0, 1920.0, 1080.0)
    }

    #[test]
    fn pinned_frame_wins_when_visible() {
        let pinned = PinnedFrame {
            x: 1500.0,
            y: 100.0,
            width: 500.0,
            height: 700.0,
        };
        let anchor = Rect::new(1200.0, 0.0, 24.0, 24.0);
        let frame = popup_frame(SIZE, Some(pinned), Some(anchor), &[main_monitor(), second_monitor()]);
        assert_eq!(frame, Rect::from(pinned));
    }

    #[test]
    fn off_screen_pinned_frame_falls_back_to_anchor() {
        let pinned = PinnedFrame {
            x: 4000.0,
            y: 100.0,
            width: 500.0,
            height: 700.0,
        };
        let anchor = Rect::new(700.0, 0.0, 40.0, 24.0);
        let frame = popup_frame(SIZE, Some(pinned), Some(anchor), &[main_monitor()]);
        assert_eq!(frame, Rect::new(520.0, 28.0, 400.0, 600.0));
    }

    #[test]
    fn anchor_near_edge_is_clamped() {
        let anchor = Rect::new(1420.0, 0.0, 20.0, 24.0);
        let frame = popup_frame(SIZE, None, Some(anchor), &[main_monitor(), second_monitor()]);
        assert_eq!(frame.x, 1040.0);
        assert_eq!(frame.y, 28.0);
    }

    #[test]
    fn anchor_on_second_monitor_uses_that_monitor() {
        let anchor = Rect::new(3300.0, 0.0, 40.0, 24.0);
        let frame = popup_frame(SIZE, None, Some(anchor), &[main_monitor(), second_monitor()]);
        assert_eq!(frame.x, 2960.0);
    }

    #[test]
    fn no_anchor_centres_on_first_monitor() {
        let frame = popup_frame(SIZE, None, None, &[main_monitor()]);
        assert_eq!(frame, Rect::new(520.0, TOP_MARGIN, 400.0, 600.0));

        let frame = popup_frame(SIZE, None, None, &[]);
        assert_eq!(frame.x, 0.0);
    }

    #[test]
    fn rect_intersection() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert!(a.intersects(&Rect::new(5.0, 5.0, 10.0, 10.0)));
        assert!(!a.intersects(&Rect::new(10.0, 0.0, 10.0, 10.0)));
    }
}
