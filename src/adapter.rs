//! The capability contract the engine needs from an interactive drawing surface.

use crate::catalog::Field;
use crate::error::TemplateError;

pub trait DrawingSurfaceAdapter {
    /// Enter "create a new region" mode on the displayed page.
    fn draw_rectangle(&mut self) -> Result<(), TemplateError>;

    /// Enter "modify an existing region" mode; `position` is 1-based in insertion order.
    fn edit(&mut self, position: usize) -> Result<(), TemplateError>;

    /// Drop the region at 1-based `position` on the displayed page; later regions shift down.
    fn delete_region(&mut self, position: usize) -> Result<(), TemplateError>;

    /// Freeze every region. Idempotent; later draw/edit calls fail with `SurfaceStopped`.
    fn stop(&mut self) -> Result<(), TemplateError>;

    // Hosts that label or color regions hear about the selection before the draw/edit call.
    fn set_active_field(&mut self, _field: &Field) {}

    fn page_changed(&mut self, _page_index: usize) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InteractionState {
    #[default]
    Idle,
    Drawing,
    Editing(usize),
    Stopped,
}

/// State machine shared by adapter implementations.
#[derive(Debug, Clone, Default)]
pub struct InteractionTracker {
    state: InteractionState,
}

impl InteractionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> InteractionState {
        self.state
    }

    pub fn is_stopped(&self) -> bool {
        self.state == InteractionState::Stopped
    }

    pub fn begin_draw(&mut self) -> Result<(), TemplateError> {
        self.ensure_active()?;
        self.state = InteractionState::Drawing;
        Ok(())
    }

    pub fn begin_edit(&mut self, position: usize) -> Result<(), TemplateError> {
        self.ensure_active()?;
        if position == 0 {
            return Err(TemplateError::InvalidConfiguration(
                "edit positions are 1-based".to_string(),
            ));
        }
        self.state = InteractionState::Editing(position);
        Ok(())
    }

    // Returns the interaction that was open, if any.
    pub fn finish(&mut self) -> Result<InteractionState, TemplateError> {
        self.ensure_active()?;
        Ok(std::mem::replace(&mut self.state, InteractionState::Idle))
    }

    // Returns false when the tracker was already stopped.
    pub fn stop(&mut self) -> bool {
        let was_stopped = self.is_stopped();
        self.state = InteractionState::Stopped;
        !was_stopped
    }

    fn ensure_active(&self) -> Result<(), TemplateError> {
        if self.is_stopped() {
            return Err(TemplateError::SurfaceStopped);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_and_edit_return_to_idle_on_finish() {
        let mut tracker = InteractionTracker::new();
        tracker.begin_draw().expect("draw");
        assert_eq!(tracker.state(), InteractionState::Drawing);
        assert_eq!(tracker.finish().expect("finish"), InteractionState::Drawing);
        assert_eq!(tracker.state(), InteractionState::Idle);

        tracker.begin_edit(2).expect("edit");
        assert_eq!(tracker.state(), InteractionState::Editing(2));
        tracker.finish().expect("finish");
        assert_eq!(tracker.state(), InteractionState::Idle);
    }

    #[test]
    fn new_interaction_replaces_open_one() {
        let mut tracker = InteractionTracker::new();
        tracker.begin_draw().expect("draw");
        tracker.begin_edit(1).expect("edit");
        assert_eq!(tracker.state(), InteractionState::Editing(1));
    }

    #[test]
    fn edit_zero_is_rejected() {
        let mut tracker = InteractionTracker::new();
        assert!(matches!(
            tracker.begin_edit(0),
            Err(TemplateError::InvalidConfiguration(_))
        ));
        assert_eq!(tracker.state(), InteractionState::Idle);
    }

    #[test]
    fn stop_is_terminal_and_idempotent() {
        let mut tracker = InteractionTracker::new();
        tracker.begin_draw().expect("draw");
        assert!(tracker.stop());
        assert!(!tracker.stop());
        assert!(matches!(tracker.begin_draw(), Err(TemplateError::SurfaceStopped)));
        assert!(matches!(tracker.begin_edit(1), Err(TemplateError::SurfaceStopped)));
        assert!(matches!(tracker.finish(), Err(TemplateError::SurfaceStopped)));
    }
}
