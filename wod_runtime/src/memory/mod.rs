//! Per-block observable memory: tagged, typed, subscribable slots.
//!
//! Every slot is owned by exactly one block and mutated only through that
//! block's behavior context. External code reads through [`MemoryHandle`]s
//! and subscriptions. Tags are frozen at build time; the former open string
//! namespace survives only in the `Display` impls.

use std::borrow::Cow;

use serde::{Deserialize, Serialize};
use wod_script::Fragment;

pub mod display;
pub mod location;
pub mod state;
pub mod view;

pub use display::DisplayView;
pub use location::{MemoryHandle, MemoryListener, MemoryLocation, MemorySubscription};
pub use state::{ChildrenStatus, RoundState, TimerRole, TimerState};
pub use view::{MemoryRead, MemoryView, TypedView};

/// The closed set of memory tags.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTag {
    /// Timer behavior state.
    Timer,
    /// Round counter state.
    Round,
    /// Display behavior state.
    Display,
    /// Child-dispatch progress.
    ChildrenStatus,
    /// Named per-behavior coordination flags (`handler:<name>`).
    Handler(Cow<'static, str>),
    /// Public, UI-visible fragment overrides feeding the resolved view.
    FragmentDisplay,
    /// Result fragments collected on unmount for history.
    FragmentResult,
    /// Fragments inherited by child blocks at compile time.
    FragmentPromote,
    /// Per-round rep target inherited by child blocks at compile time.
    FragmentRepTarget,
    /// Runtime-tracked metric fragments.
    FragmentTracked,
    /// Resolved label fragments.
    FragmentLabel,
    /// Preview fragments for the upcoming child.
    FragmentNext,
}

/// UI-facing visibility tier of a tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    /// Public, feeds the display view.
    Display,
    /// Public, collected into history.
    Result,
    /// Public to descendants at compile time.
    Promote,
    /// Never leaves the owning block.
    Private,
}

impl MemoryTag {
    /// The tag's fixed visibility tier. Anything not explicitly public is
    /// private, matching the old "unknown `fragment:*` tags default to
    /// private" rule.
    pub fn visibility(&self) -> Visibility {
        match self {
            MemoryTag::FragmentDisplay => Visibility::Display,
            MemoryTag::FragmentResult => Visibility::Result,
            MemoryTag::FragmentPromote | MemoryTag::FragmentRepTarget => Visibility::Promote,
            _ => Visibility::Private,
        }
    }
}

impl std::fmt::Display for MemoryTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryTag::Timer => f.write_str("timer"),
            MemoryTag::Round => f.write_str("round"),
            MemoryTag::Display => f.write_str("display"),
            MemoryTag::ChildrenStatus => f.write_str("children:status"),
            MemoryTag::Handler(name) => write!(f, "handler:{name}"),
            MemoryTag::FragmentDisplay => f.write_str("fragment:display"),
            MemoryTag::FragmentResult => f.write_str("fragment:result"),
            MemoryTag::FragmentPromote => f.write_str("fragment:promote"),
            MemoryTag::FragmentRepTarget => f.write_str("fragment:rep-target"),
            MemoryTag::FragmentTracked => f.write_str("fragment:tracked"),
            MemoryTag::FragmentLabel => f.write_str("fragment:label"),
            MemoryTag::FragmentNext => f.write_str("fragment:next"),
        }
    }
}

/// The typed value held by a slot. `fragment:*` tags hold fragment lists;
/// behavior-state tags hold their dedicated type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryValue {
    /// Timer state (`timer` tag).
    Timer(TimerState),
    /// Round state (`round` tag).
    Round(RoundState),
    /// Child-dispatch progress (`children:status` tag).
    Children(ChildrenStatus),
    /// Fragment list (all `fragment:*` tags, `display`).
    Fragments(Vec<Fragment>),
    /// Boolean coordination flag (`handler:*` tags).
    Flag(bool),
}

/// The ordered list of slots owned by one block.
#[derive(Debug, Default)]
pub struct BlockMemory {
    locations: Vec<MemoryLocation>,
    /// Bumped on every allocate/update/release; the session uses it to detect
    /// progress between `next` cycles.
    mutations: u64,
}

impl BlockMemory {
    /// Allocates a new slot and returns a weak handle to it.
    pub fn push(&mut self, tag: MemoryTag, value: MemoryValue) -> MemoryHandle {
        let location = MemoryLocation::new(tag, value);
        let handle = location.handle();
        self.locations.push(location);
        self.mutations += 1;
        handle
    }

    /// All slots with the given tag, in allocation order. Multiple slots may
    /// share a tag.
    pub fn get_by_tag<'a>(&'a self, tag: &'a MemoryTag) -> impl Iterator<Item = &'a MemoryLocation> {
        self.locations.iter().filter(move |loc| &loc.tag() == tag)
    }

    /// First slot with the given tag.
    pub fn first<'a>(&'a self, tag: &'a MemoryTag) -> Option<&'a MemoryLocation> {
        self.get_by_tag(tag).next()
    }

    /// All slots of the given visibility tier.
    pub fn all_by_visibility(&self, tier: Visibility) -> impl Iterator<Item = &MemoryLocation> {
        self.locations
            .iter()
            .filter(move |loc| loc.tag().visibility() == tier)
    }

    /// Every slot, in allocation order.
    pub fn locations(&self) -> &[MemoryLocation] {
        &self.locations
    }

    /// Updates the first slot with the tag. Fails if the tag has no live
    /// slot; an equal-value write changes (and notifies) nothing. Returns
    /// whether the value changed.
    pub fn update(&mut self, tag: &MemoryTag, value: MemoryValue) -> Result<bool, MemoryTag> {
        let location = self.first(tag).ok_or_else(|| tag.clone())?;
        let changed = location.update(value)?;
        if changed {
            self.mutations += 1;
        }
        Ok(changed)
    }

    /// Releases every slot, notifying subscribers once each. Called from
    /// block dispose.
    pub fn release_all(&mut self) {
        for location in &self.locations {
            location.release();
        }
        self.mutations += 1;
    }

    /// Monotonic mutation counter.
    pub fn mutation_count(&self) -> u64 {
        self.mutations
    }

    /// Number of slots (live and released).
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    /// True when no slots were ever allocated.
    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }
}
