//! Announcement debounce policy.
//!
//! Decides, once per frame, whether what is currently visible is worth
//! saying out loud. A label is announced when it differs from the last
//! announced label, or when the cooldown since the last announcement has
//! elapsed. Only one label is announced per frame: the lexicographically
//! smallest one in the frame's label set.

use std::time::Duration;

use crate::clock::Timestamp;
use crate::detect::DetectedLabelSet;

/// Minimum interval before the same label may be announced again.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5);

/// Last announcement made.
///
/// `last_announced_at` never decreases as long as `decide` is called with
/// non-decreasing `now` values.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AnnouncementState {
    pub last_label: Option<String>,
    pub last_announced_at: Timestamp,
}

impl AnnouncementState {
    pub fn new() -> Self {
        Self {
            last_label: None,
            last_announced_at: Timestamp::EPOCH,
        }
    }
}

/// Owns the announcement state and applies the debounce rules.
#[derive(Clone, Debug)]
pub struct NotificationPolicy {
    cooldown: Duration,
    state: AnnouncementState,
}

impl NotificationPolicy {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            state: AnnouncementState::new(),
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn state(&self) -> &AnnouncementState {
        &self.state
    }

    /// Decide whether to announce anything for this frame.
    ///
    /// Returns the text to speak and records the announcement, or `None`
    /// with the state untouched.
    pub fn decide(&mut self, detected: &DetectedLabelSet, now: Timestamp) -> Option<String> {
        decide(detected, now, self.cooldown, &mut self.state)
    }
}

impl Default for NotificationPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}

/// Stateless form of [`NotificationPolicy::decide`].
pub fn decide(
    detected: &DetectedLabelSet,
    now: Timestamp,
    cooldown: Duration,
    state: &mut AnnouncementState,
) -> Option<String> {
    let candidate = detected.iter().next()?;

    let novel = state.last_label.as_deref() != Some(candidate.as_str());
    let cooled_down = now.saturating_since(state.last_announced_at) > cooldown;
    if !novel && !cooled_down {
        return None;
    }

    state.last_label = Some(candidate.clone());
    // Keep the timestamp monotonic even if a caller passes an older `now`.
    state.last_announced_at = state.last_announced_at.max(now);
    Some(announcement_text(candidate))
}

/// Spoken form of an announced label.
pub fn announcement_text(label: &str) -> String {
    format!("I see a {}", label)
}
