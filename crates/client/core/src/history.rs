//! Read-only scrubbing through a replica's past.

use std::collections::VecDeque;

use game_core::{GameRules, Push, ValidationError};

use crate::replica::Replica;

/// State of history mode: a view of the live log rewound to `cursor`
/// actions, and the pushes held back until history mode ends.
#[derive(Debug)]
pub struct History {
    view: Replica,
    cursor: u64,
    autoplay: bool,
    queued: VecDeque<Push>,
}

impl History {
    pub(crate) fn enter(live: &Replica) -> Self {
        Self {
            view: live.clone(),
            cursor: live.count(),
            autoplay: false,
            queued: VecDeque::new(),
        }
    }

    /// Number of actions applied to the view.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    pub fn view(&self) -> &Replica {
        &self.view
    }

    pub fn is_autoplaying(&self) -> bool {
        self.autoplay
    }

    pub fn queued_pushes(&self) -> usize {
        self.queued.len()
    }

    pub(crate) fn queue(&mut self, push: Push) {
        self.queued.push_back(push);
    }

    pub(crate) fn take_queued(&mut self) -> VecDeque<Push> {
        std::mem::take(&mut self.queued)
    }

    pub(crate) fn set_autoplay(&mut self, on: bool) {
        self.autoplay = on;
    }

    /// Moves the view to `position` actions, clamped to the live log.
    ///
    /// Rewinding reverses actions on the view; advancing re-applies them
    /// from `live`.
    pub(crate) fn seek(
        &mut self,
        rules: &dyn GameRules,
        live: &Replica,
        position: u64,
    ) -> Result<u64, ValidationError> {
        let target = position.min(live.count());
        if target < self.cursor {
            self.view.truncate(rules, target)?;
        } else if target > self.cursor {
            let from = usize::try_from(self.cursor).unwrap_or(usize::MAX);
            let to = usize::try_from(target).unwrap_or(usize::MAX);
            self.view.apply_all(rules, live.log().get(from..to).unwrap_or_default())?;
        }
        self.cursor = target;
        Ok(target)
    }

    /// Re-derives the view after the live log was repaired underneath it.
    pub(crate) fn rebase(&mut self, rules: &dyn GameRules, live: &Replica) -> Result<(), ValidationError> {
        let mut view = live.clone();
        let target = self.cursor.min(live.count());
        view.truncate(rules, target)?;
        self.view = view;
        self.cursor = target;
        Ok(())
    }
}
