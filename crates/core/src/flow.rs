//! Next-page decisions for a unit.
//!
//! The controller is pure: it maps the active page and a completion event to a
//! [`Transition`]. Persisting the result and delaying the navigation belong to
//! the session that owns the controller.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::model::{ActivityId, StepData, TransitionEvent, TransitionRequest};

//
// ─── DELAYS ────────────────────────────────────────────────────────────────────
//

/// How long a transition lets the current page linger before navigating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pace {
    Immediate,
    /// Short acknowledgement of a button press.
    Feedback,
    /// Let a success state render.
    Success,
    /// Longer pause for a celebratory state.
    Celebrate,
}

/// Concrete durations behind each [`Pace`], plus the fixed skip delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayPolicy {
    pub feedback: Duration,
    pub success: Duration,
    pub celebrate: Duration,
    pub jump: Duration,
}

impl Default for DelayPolicy {
    fn default() -> Self {
        Self {
            feedback: Duration::from_millis(300),
            success: Duration::from_millis(1500),
            celebrate: Duration::from_millis(2500),
            jump: Duration::from_millis(300),
        }
    }
}

impl DelayPolicy {
    /// Every delay set to zero; useful for tests and headless drivers.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            feedback: Duration::ZERO,
            success: Duration::ZERO,
            celebrate: Duration::ZERO,
            jump: Duration::ZERO,
        }
    }

    #[must_use]
    pub fn delay_for(&self, pace: Pace) -> Duration {
        match pace {
            Pace::Immediate => Duration::ZERO,
            Pace::Feedback => self.feedback,
            Pace::Success => self.success,
            Pace::Celebrate => self.celebrate,
        }
    }
}

//
// ─── BRANCH RULES ──────────────────────────────────────────────────────────────
//

/// Predicate over a completion event, evaluated against the step data the
/// session would hold once the event's own patch is merged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "when", rename_all = "snake_case")]
pub enum BranchCondition {
    Signal { name: String },
    AlternateBranch,
    ActivityCompleted { activity: ActivityId },
    StepDataEquals { key: String, value: Value },
    All { of: Vec<BranchCondition> },
    Any { of: Vec<BranchCondition> },
}

impl BranchCondition {
    #[must_use]
    pub fn signal(name: impl Into<String>) -> Self {
        Self::Signal { name: name.into() }
    }

    #[must_use]
    pub fn step_data_equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::StepDataEquals {
            key: key.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn matches(&self, event: &TransitionEvent, step_data: &StepData) -> bool {
        match self {
            Self::Signal { name } => event.has_signal(name),
            Self::AlternateBranch => event.alternate_branch,
            Self::ActivityCompleted { activity } => event.activity.as_ref() == Some(activity),
            Self::StepDataEquals { key, value } => step_data.get(key) == Some(value),
            Self::All { of } => of.iter().all(|c| c.matches(event, step_data)),
            Self::Any { of } => of.iter().any(|c| c.matches(event, step_data)),
        }
    }
}

/// Redirects an advance from `page` to `target` when `condition` holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchRule {
    pub page: u32,
    pub condition: BranchCondition,
    pub target: u32,
    #[serde(default = "default_branch_pace")]
    pub pace: Pace,
}

fn default_branch_pace() -> Pace {
    Pace::Success
}

impl BranchRule {
    #[must_use]
    pub fn new(page: u32, condition: BranchCondition, target: u32) -> Self {
        Self {
            page,
            condition,
            target,
            pace: default_branch_pace(),
        }
    }

    #[must_use]
    pub fn paced(mut self, pace: Pace) -> Self {
        self.pace = pace;
        self
    }
}

//
// ─── TRANSITIONS ───────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    Back,
    Jump,
    /// Index of the matching rule in registration order.
    Branch { rule: usize },
    Sequential,
    /// Completion recorded on the final page.
    Finish,
    /// Nothing left to advance to.
    Stay,
    /// The event came from a page that is no longer active.
    Stale,
}

/// Outcome of [`FlowController::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub kind: TransitionKind,
    pub from: u32,
    pub target: u32,
    pub delay: Duration,
    /// Set only by a completion event emitted from the final page.
    pub completes_unit: bool,
}

impl Transition {
    fn stay(kind: TransitionKind, page: u32, completes_unit: bool) -> Self {
        Self {
            kind,
            from: page,
            target: page,
            delay: Duration::ZERO,
            completes_unit,
        }
    }

    #[must_use]
    pub fn moves(&self) -> bool {
        self.from != self.target
    }

    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.kind == TransitionKind::Stale
    }
}

//
// ─── CONTROLLER ────────────────────────────────────────────────────────────────
//

/// State machine over pages `1..=total_pages`.
#[derive(Debug, Clone)]
pub struct FlowController {
    total_pages: u32,
    rules: Vec<BranchRule>,
    delays: DelayPolicy,
}

impl FlowController {
    /// `total_pages` below one is raised to one so the page range is never empty.
    #[must_use]
    pub fn new(total_pages: u32, rules: Vec<BranchRule>, delays: DelayPolicy) -> Self {
        Self {
            total_pages: total_pages.max(1),
            rules,
            delays,
        }
    }

    #[must_use]
    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    #[must_use]
    pub fn delays(&self) -> &DelayPolicy {
        &self.delays
    }

    #[must_use]
    pub fn rules(&self) -> &[BranchRule] {
        &self.rules
    }

    #[must_use]
    pub fn clamp(&self, page: u32) -> u32 {
        page.clamp(1, self.total_pages)
    }

    /// Decide where the learner goes after `event` on the active page.
    ///
    /// Precedence: back, explicit jump, branch rules in registration order,
    /// sequential advance, then completion or staying on the final page.
    /// `step_data` is the session's data with the event's patch already merged.
    #[must_use]
    pub fn next(&self, active_page: u32, event: &TransitionEvent, step_data: &StepData) -> Transition {
        let current = self.clamp(active_page);
        if event.page != current {
            debug!(event_page = event.page, current, "ignoring event from inactive page");
            return Transition::stay(TransitionKind::Stale, current, false);
        }

        let transition = match event.request {
            TransitionRequest::Back => Transition {
                kind: TransitionKind::Back,
                from: current,
                target: current.saturating_sub(1).max(1),
                delay: Duration::ZERO,
                completes_unit: false,
            },
            TransitionRequest::JumpTo(page) => self.moving(
                TransitionKind::Jump,
                current,
                page,
                self.delays.jump,
            ),
            TransitionRequest::Advance => self.advance(current, event, step_data),
        };

        if transition.kind == TransitionKind::Stay {
            debug!(page = current, total = self.total_pages, "no further page to advance to");
        }
        transition
    }

    fn advance(&self, current: u32, event: &TransitionEvent, step_data: &StepData) -> Transition {
        let matched = self
            .rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.page == current && rule.condition.matches(event, step_data));
        if let Some((index, rule)) = matched {
            return self.moving(
                TransitionKind::Branch { rule: index },
                current,
                rule.target,
                self.delays.delay_for(rule.pace),
            );
        }

        if current < self.total_pages {
            let pace = event.pace.unwrap_or(Pace::Success);
            return self.moving(
                TransitionKind::Sequential,
                current,
                current + 1,
                self.delays.delay_for(pace),
            );
        }

        if event.completes_unit {
            Transition::stay(TransitionKind::Finish, current, true)
        } else {
            Transition::stay(TransitionKind::Stay, current, false)
        }
    }

    fn moving(
        &self,
        kind: TransitionKind,
        from: u32,
        requested: u32,
        delay: Duration,
    ) -> Transition {
        let target = self.clamp(requested);
        Transition {
            kind,
            from,
            target,
            delay: if target == from { Duration::ZERO } else { delay },
            completes_unit: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn controller(total: u32, rules: Vec<BranchRule>) -> FlowController {
        FlowController::new(total, rules, DelayPolicy::default())
    }

    fn next(flow: &FlowController, page: u32, event: &TransitionEvent) -> Transition {
        flow.next(page, event, &event.step_data)
    }

    #[test]
    fn plain_event_advances_after_success_delay() {
        let flow = controller(3, Vec::new());
        let t = next(&flow, 1, &TransitionEvent::advance(1));
        assert_eq!(t.kind, TransitionKind::Sequential);
        assert_eq!(t.target, 2);
        assert_eq!(t.delay, Duration::from_millis(1500));
        assert!(!t.completes_unit);
    }

    #[test]
    fn pace_override_changes_sequential_delay() {
        let flow = controller(3, Vec::new());
        let t = next(&flow, 1, &TransitionEvent::advance(1).paced(Pace::Celebrate));
        assert_eq!(t.delay, Duration::from_millis(2500));
        let t = next(&flow, 1, &TransitionEvent::advance(1).paced(Pace::Feedback));
        assert_eq!(t.delay, Duration::from_millis(300));
    }

    #[test]
    fn back_is_immediate_and_floors_at_one() {
        let flow = controller(5, Vec::new());
        let t = next(&flow, 2, &TransitionEvent::back(2));
        assert_eq!((t.kind, t.target, t.delay), (TransitionKind::Back, 1, Duration::ZERO));

        for _ in 0..3 {
            let t = next(&flow, 1, &TransitionEvent::back(1));
            assert_eq!(t.target, 1);
        }
    }

    #[test]
    fn back_wins_over_every_other_flag() {
        let rule = BranchRule::new(3, BranchCondition::signal("skippedSurvey"), 14);
        let flow = controller(43, vec![rule]);
        let mut event = TransitionEvent::back(3)
            .with_signal("skippedSurvey")
            .alternate()
            .completing();
        event.pace = Some(Pace::Celebrate);
        let t = next(&flow, 3, &event);
        assert_eq!(t.kind, TransitionKind::Back);
        assert_eq!(t.target, 2);
        assert!(!t.completes_unit);
    }

    #[test]
    fn jump_is_clamped_and_uses_jump_delay() {
        let flow = controller(10, Vec::new());
        let t = next(&flow, 2, &TransitionEvent::jump(2, 99));
        assert_eq!((t.kind, t.target), (TransitionKind::Jump, 10));
        assert_eq!(t.delay, Duration::from_millis(300));

        let t = next(&flow, 2, &TransitionEvent::jump(2, 0));
        assert_eq!(t.target, 1);
    }

    #[test]
    fn jump_takes_priority_over_branch_rules() {
        let rule = BranchRule::new(2, BranchCondition::AlternateBranch, 8);
        let flow = controller(10, vec![rule]);
        let t = next(&flow, 2, &TransitionEvent::jump(2, 5).alternate());
        assert_eq!((t.kind, t.target), (TransitionKind::Jump, 5));
    }

    #[test]
    fn skipped_survey_branches_past_the_survey() {
        let rule = BranchRule::new(3, BranchCondition::signal("skippedSurvey"), 14);
        let flow = controller(43, vec![rule]);
        let t = next(&flow, 3, &TransitionEvent::advance(3).with_signal("skippedSurvey"));
        assert_eq!(t.kind, TransitionKind::Branch { rule: 0 });
        assert_eq!(t.target, 14);

        let t = next(&flow, 3, &TransitionEvent::advance(3));
        assert_eq!((t.kind, t.target), (TransitionKind::Sequential, 4));
    }

    #[test]
    fn first_registered_rule_wins() {
        let rules = vec![
            BranchRule::new(4, BranchCondition::signal("gameCompleted"), 6).paced(Pace::Celebrate),
            BranchRule::new(4, BranchCondition::signal("gameCompleted"), 9),
            BranchRule::new(5, BranchCondition::signal("gameCompleted"), 1),
        ];
        let flow = controller(10, rules);
        let t = next(&flow, 4, &TransitionEvent::advance(4).with_signal("gameCompleted"));
        assert_eq!(t.kind, TransitionKind::Branch { rule: 0 });
        assert_eq!(t.target, 6);
        assert_eq!(t.delay, Duration::from_millis(2500));
    }

    #[test]
    fn step_data_conditions_read_merged_data() {
        let rule = BranchRule::new(
            2,
            BranchCondition::All {
                of: vec![
                    BranchCondition::step_data_equals("level", "advanced"),
                    BranchCondition::Any {
                        of: vec![
                            BranchCondition::ActivityCompleted {
                                activity: ActivityId::new("placement"),
                            },
                            BranchCondition::signal("placementSkipped"),
                        ],
                    },
                ],
            },
            7,
        );
        let flow = controller(8, vec![rule]);
        let earlier = StepData::new().with("level", json!("advanced"));
        let event = TransitionEvent::advance(2).with_activity("placement");
        assert_eq!(flow.next(2, &event, &earlier).target, 7);
        assert_eq!(flow.next(2, &event, &StepData::new()).target, 3);
    }

    #[test]
    fn final_page_without_completion_stays_put() {
        let flow = controller(3, Vec::new());
        for _ in 0..3 {
            let t = next(&flow, 3, &TransitionEvent::advance(3));
            assert_eq!((t.kind, t.target), (TransitionKind::Stay, 3));
            assert!(!t.completes_unit);
        }
    }

    #[test]
    fn completion_on_final_page_finishes_the_unit() {
        let flow = controller(3, Vec::new());
        let t = next(&flow, 3, &TransitionEvent::advance(3).completing());
        assert_eq!((t.kind, t.target), (TransitionKind::Finish, 3));
        assert!(t.completes_unit);
    }

    #[test]
    fn completion_flag_off_the_final_page_is_a_plain_advance() {
        let flow = controller(3, Vec::new());
        let t = next(&flow, 1, &TransitionEvent::advance(1).completing());
        assert_eq!((t.kind, t.target), (TransitionKind::Sequential, 2));
        assert!(!t.completes_unit);
    }

    #[test]
    fn landing_on_the_final_page_does_not_finish_the_unit() {
        let rule = BranchRule::new(1, BranchCondition::signal("gameCompleted"), 3);
        let flow = controller(3, vec![rule]);

        let t = next(&flow, 2, &TransitionEvent::advance(2).completing());
        assert_eq!((t.kind, t.target), (TransitionKind::Sequential, 3));
        assert!(!t.completes_unit);

        let t = next(&flow, 1, &TransitionEvent::jump(1, 3).completing());
        assert_eq!((t.kind, t.target), (TransitionKind::Jump, 3));
        assert!(!t.completes_unit);

        let t = next(&flow, 1, &TransitionEvent::advance(1).with_signal("gameCompleted").completing());
        assert_eq!((t.kind, t.target), (TransitionKind::Branch { rule: 0 }, 3));
        assert!(!t.completes_unit);
    }

    #[test]
    fn events_from_other_pages_are_stale() {
        let flow = controller(5, Vec::new());
        let t = next(&flow, 3, &TransitionEvent::advance(2));
        assert!(t.is_stale());
        assert_eq!(t.target, 3);
    }

    #[test]
    fn page_stays_in_bounds_for_any_event_sequence() {
        let rules = vec![BranchRule::new(2, BranchCondition::AlternateBranch, 40)];
        let flow = controller(6, rules);
        let mut page = 1;
        for step in 0..200u32 {
            let event = match step % 7 {
                0 | 1 => TransitionEvent::advance(page),
                2 => TransitionEvent::back(page),
                3 => TransitionEvent::jump(page, step),
                4 => TransitionEvent::advance(page).alternate(),
                5 => TransitionEvent::advance(page).completing(),
                _ => TransitionEvent::jump(page, 0),
            };
            page = next(&flow, page, &event).target;
            assert!((1..=6).contains(&page), "page {page} out of range");
        }
    }

    #[test]
    fn rules_decode_from_catalog_json() {
        let rule: BranchRule = serde_json::from_value(json!({
            "page": 3,
            "condition": { "when": "signal", "name": "skippedSurvey" },
            "target": 14
        }))
        .unwrap();
        assert_eq!(rule, BranchRule::new(3, BranchCondition::signal("skippedSurvey"), 14));
    }
}
