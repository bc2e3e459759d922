//! The precedence-resolved `fragment:display` view.
//!
//! The UI never reads plan fragments or runtime overrides directly; it reads
//! this view, which merges both and resolves per fragment kind by origin
//! rank (`user > runtime > compiler > parser`). Ties at the winning rank are
//! all kept, so a 21-15-9 rep scheme survives resolution as three fragments.

use itertools::Itertools;
use wod_script::{Fragment, FragmentKind};

use super::location::{MemoryHandle, MemorySubscription};
use super::view::MemoryRead;
use super::MemoryValue;

/// Resolves a fragment list by origin precedence: for each kind present, keep
/// exactly the fragments of the maximum rank, in input order.
pub fn resolve(fragments: &[Fragment]) -> Vec<Fragment> {
    let max_rank: std::collections::HashMap<FragmentKind, u8> = fragments
        .iter()
        .map(|fragment| (fragment.kind(), fragment.origin.rank()))
        .into_grouping_map()
        .max();
    fragments
        .iter()
        .filter(|fragment| max_rank[&fragment.kind()] == fragment.origin.rank())
        .cloned()
        .collect()
}

/// Live view over a block's plan fragments plus its `fragment:display`
/// overrides. Re-resolution is automatic: the view recomputes on every read,
/// and [`DisplayView::subscribe`] taps the backing memory so consumers learn
/// when a recompute is worthwhile.
#[derive(Clone, Debug)]
pub struct DisplayView {
    plan: Vec<Fragment>,
    overrides: MemoryHandle,
}

impl DisplayView {
    /// Builds a view from immutable plan fragments and the block's
    /// `fragment:display` slot handle.
    pub fn new(plan: Vec<Fragment>, overrides: MemoryHandle) -> DisplayView {
        DisplayView { plan, overrides }
    }

    /// Plan plus overrides, unresolved, in plan-then-override order.
    pub fn raw_fragments(&self) -> Vec<Fragment> {
        let mut raw = self.plan.clone();
        if let Some(value) = self.overrides.value() {
            if let Some(fragments) = <Vec<Fragment>>::read(&value) {
                raw.extend(fragments);
            }
        }
        raw
    }

    /// The precedence-resolved fragment list.
    pub fn resolved(&self) -> Vec<Fragment> {
        resolve(&self.raw_fragments())
    }

    /// The single best fragment of a kind, if present.
    pub fn get_fragment(&self, kind: FragmentKind) -> Option<Fragment> {
        self.resolved()
            .into_iter()
            .find(|fragment| fragment.kind() == kind)
    }

    /// All surviving fragments of a kind, precedence-ordered.
    pub fn all_by_kind(&self, kind: FragmentKind) -> Vec<Fragment> {
        self.resolved()
            .into_iter()
            .filter(|fragment| fragment.kind() == kind)
            .collect()
    }

    /// True when any fragment of the kind survives resolution.
    pub fn has(&self, kind: FragmentKind) -> bool {
        self.get_fragment(kind).is_some()
    }

    /// Subscribes to the backing override slot; fires on every override
    /// change so the consumer can re-read [`DisplayView::resolved`].
    pub fn subscribe(
        &self,
        mut listener: impl FnMut(Option<&MemoryValue>, Option<&MemoryValue>) + 'static,
    ) -> Option<MemorySubscription> {
        self.overrides.subscribe(move |new, old| listener(new, old))
    }
}
