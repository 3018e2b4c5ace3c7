//! Button arbitration across duplicate report sources.
//!
//! Touch mice report the same physical button through several reports,
//! sometimes with extra delay, and which report is used can change with a
//! finger on the surface. Each button remembers the source that pressed it;
//! only that source may release it.

use crate::event::{Button, InputEvent};
use tracing::trace;

/// Report kinds that can assert a button.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonSource {
    /// Pointer report (0x02) button byte.
    PrimaryReport,
    /// Raw touch points feature, button sub-event.
    RawPointsReport,
    /// Auxiliary button feature.
    AuxReport,
}

/// Per-button depressor state.
#[derive(Debug, Clone, Default)]
pub struct ButtonArbiter {
    depressors: [Option<ButtonSource>; 3],
    ignored: Vec<(Button, ButtonSource)>,
}

impl ButtonArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Never let `source` affect `button` (known-noisy duplicate on some models).
    pub fn ignore(mut self, button: Button, source: ButtonSource) -> Self {
        self.ignored.push((button, source));
        self
    }

    /// Ignore `source` for every button.
    pub fn ignore_source(self, source: ButtonSource) -> Self {
        Button::ALL
            .into_iter()
            .fold(self, |arbiter, button| arbiter.ignore(button, source))
    }

    /// Source currently holding `button` down.
    pub fn depressor(&self, button: Button) -> Option<ButtonSource> {
        self.depressors[button.index()]
    }

    pub fn is_pressed(&self, button: Button) -> bool {
        self.depressor(button).is_some()
    }

    /// Feed one observation. Returns true when the button's state changed.
    pub fn observe(&mut self, button: Button, source: ButtonSource, pressed: bool) -> bool {
        if self.ignored.contains(&(button, source)) {
            return false;
        }
        let slot = &mut self.depressors[button.index()];
        match (*slot, pressed) {
            (None, true) => {
                *slot = Some(source);
                trace!(?button, ?source, "Button pressed");
                true
            }
            (Some(holder), false) if holder == source => {
                *slot = None;
                trace!(?button, ?source, "Button released");
                true
            }
            _ => false,
        }
    }

    /// Feed a button bitmask (bit 0 left, bit 1 right, bit 2 middle).
    pub fn observe_bits(&mut self, bits: u8, source: ButtonSource) {
        for button in Button::ALL {
            self.observe(button, source, bits & button.mask() != 0);
        }
    }

    /// Report the state of all three buttons.
    pub fn emit_state(&self, out: &mut Vec<InputEvent>) {
        for button in Button::ALL {
            out.push(InputEvent::Button {
                button,
                pressed: self.is_pressed(button),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_source_cannot_steal_or_release() {
        let mut arbiter = ButtonArbiter::new();
        assert!(arbiter.observe(Button::Left, ButtonSource::PrimaryReport, true));
        // raw points also sees the press: ignored
        assert!(!arbiter.observe(Button::Left, ButtonSource::RawPointsReport, true));
        assert_eq!(
            arbiter.depressor(Button::Left),
            Some(ButtonSource::PrimaryReport)
        );
        // raw points reports release first: still held by primary
        assert!(!arbiter.observe(Button::Left, ButtonSource::RawPointsReport, false));
        assert!(arbiter.is_pressed(Button::Left));
        // primary releases
        assert!(arbiter.observe(Button::Left, ButtonSource::PrimaryReport, false));
        assert!(!arbiter.is_pressed(Button::Left));
        // now raw points may press
        assert!(arbiter.observe(Button::Left, ButtonSource::RawPointsReport, true));
        assert_eq!(
            arbiter.depressor(Button::Left),
            Some(ButtonSource::RawPointsReport)
        );
    }

    #[test]
    fn buttons_are_independent() {
        let mut arbiter = ButtonArbiter::new();
        arbiter.observe(Button::Middle, ButtonSource::AuxReport, true);
        arbiter.observe_bits(0x01, ButtonSource::PrimaryReport);
        assert_eq!(
            arbiter.depressor(Button::Middle),
            Some(ButtonSource::AuxReport)
        );
        assert_eq!(
            arbiter.depressor(Button::Left),
            Some(ButtonSource::PrimaryReport)
        );
        assert!(!arbiter.is_pressed(Button::Right));
        // primary bits say middle is up, but primary never held it
        arbiter.observe_bits(0x00, ButtonSource::PrimaryReport);
        assert!(arbiter.is_pressed(Button::Middle));
        assert!(!arbiter.is_pressed(Button::Left));
    }

    #[test]
    fn ignored_source_has_no_effect() {
        let mut arbiter = ButtonArbiter::new().ignore_source(ButtonSource::PrimaryReport);
        arbiter.observe_bits(0x07, ButtonSource::PrimaryReport);
        assert!(Button::ALL.iter().all(|b| !arbiter.is_pressed(*b)));
        assert!(arbiter.observe(Button::Left, ButtonSource::RawPointsReport, true));
    }

    #[test]
    fn emit_state_reports_all_buttons() {
        let mut arbiter = ButtonArbiter::new();
        arbiter.observe(Button::Right, ButtonSource::PrimaryReport, true);
        let mut out = Vec::new();
        arbiter.emit_state(&mut out);
        assert_eq!(
            out,
            vec![
                InputEvent::Button {
                    button: Button::Left,
                    pressed: false
                },
                InputEvent::Button {
                    button: Button::Right,
                    pressed: true
                },
                InputEvent::Button {
                    button: Button::Middle,
                    pressed: false
                },
            ]
        );
    }
}
