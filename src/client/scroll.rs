//! Auto-scroll and scroll-chaining decisions for the message viewport.

use super::reconciler::Effect;

/// Distance from the bottom, in pixels, that still counts as "at the bottom".
pub const STICK_THRESHOLD: f64 = 50.0;

/// Extra slack allowed when deciding whether a touch gesture has hit the bottom.
const TOUCH_BOTTOM_TOLERANCE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl Viewport {
    pub fn is_scrollable(&self) -> bool {
        self.scroll_height > self.client_height
    }

    fn distance_from_bottom(&self) -> f64 {
        self.scroll_height - self.scroll_top - self.client_height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollCommand {
    ToBottom {
        instant: bool,
    },
}

/// Whether a wheel or touch gesture stays inside the viewport or reaches the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureRouting {
    Consume,
    Propagate,
}

#[derive(Debug, Clone, Copy)]
struct TouchStart {
    y: f64,
}

#[derive(Debug)]
pub struct ScrollAnchorController {
    stuck_to_bottom: bool,
    scrollable: bool,
    touch_start: Option<TouchStart>,
}

impl Default for ScrollAnchorController {
    fn default() -> Self {
        Self::new()
    }
}

impl ScrollAnchorController {
    pub fn new() -> Self {
        Self {
            stuck_to_bottom: true,
            scrollable: false,
            touch_start: None,
        }
    }

    pub fn stuck_to_bottom(&self) -> bool {
        self.stuck_to_bottom
    }

    /// Last known scrollability, for overscroll-containment styling.
    pub fn is_scrollable(&self) -> bool {
        self.scrollable
    }

    pub fn on_scroll(&mut self, viewport: Viewport) {
        self.stuck_to_bottom = viewport.distance_from_bottom() < STICK_THRESHOLD;
        self.scrollable = viewport.is_scrollable();
    }

    /// Call after every change to the rendered conversation or stream status.
    pub fn on_mutation(&mut self, viewport: Viewport) -> Option<ScrollCommand> {
        self.scrollable = viewport.is_scrollable();
        self.stuck_to_bottom.then_some(ScrollCommand::ToBottom { instant: true })
    }

    pub fn on_user_send(&mut self) {
        self.stuck_to_bottom = true;
    }

    /// Follows one reconciler effect. `viewport` is measured after the view was re-rendered.
    pub fn apply_effect(&mut self, effect: &Effect, viewport: Viewport) -> Option<ScrollCommand> {
        match effect {
            Effect::UserSent => {
                self.on_user_send();
                None
            }
            Effect::ViewChanged => self.on_mutation(viewport),
            Effect::OpenStream { .. } | Effect::CancelStream { .. } => None,
        }
    }

    pub fn on_wheel(&self, viewport: Viewport, delta_y: f64) -> GestureRouting {
        if !viewport.is_scrollable() {
            return GestureRouting::Propagate;
        }
        let at_top = viewport.scroll_top <= 0.0;
        let at_bottom = viewport.scroll_height - viewport.scroll_top <= viewport.client_height;

        if (delta_y > 0.0 && !at_bottom) || (delta_y < 0.0 && !at_top) {
            GestureRouting::Consume
        } else {
            GestureRouting::Propagate
        }
    }

    pub fn on_touch_start(&mut self, touch_y: f64) {
        self.touch_start = Some(TouchStart { y: touch_y });
    }

    pub fn on_touch_move(&self, viewport: Viewport, touch_y: f64) -> GestureRouting {
        let Some(start) = self.touch_start else {
            return GestureRouting::Propagate;
        };
        if !viewport.is_scrollable() {
            return GestureRouting::Propagate;
        }

        // Finger moving up scrolls the content down.
        let delta_y = start.y - touch_y;
        let at_top = viewport.scroll_top <= 0.0;
        let at_bottom =
            viewport.scroll_height - viewport.scroll_top <= viewport.client_height + TOUCH_BOTTOM_TOLERANCE;

        if (delta_y < 0.0 && at_top) || (delta_y > 0.0 && at_bottom) {
            GestureRouting::Propagate
        } else {
            GestureRouting::Consume
        }
    }
}
