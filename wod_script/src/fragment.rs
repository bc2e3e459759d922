//! Typed value fragments carried by statements and block memory.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::time::{DurationMs, EpochMs, TimeSpan, TimerDirection};

/// Provenance of a fragment. Defines a total precedence order used by the
/// display-resolution view: `User > Runtime > Compiler > Parser`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Came straight out of the parsed script.
    Parser,
    /// Synthesized while compiling statements into a block.
    Compiler,
    /// Produced by a running behavior.
    Runtime,
    /// Explicit user override. Always wins.
    User,
}

impl Origin {
    /// Precedence rank, `Parser = 0` .. `User = 3`.
    pub fn rank(self) -> u8 {
        match self {
            Origin::Parser => 0,
            Origin::Compiler => 1,
            Origin::Runtime => 2,
            Origin::User => 3,
        }
    }
}

/// The payload of a [`Fragment`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentValue {
    /// A timer prescription. `duration_ms` is `None` for an open-ended
    /// stopwatch.
    Timer {
        /// Countdown duration, if any.
        duration_ms: Option<DurationMs>,
        /// Count direction.
        direction: TimerDirection,
    },
    /// Total number of rounds.
    Rounds(u32),
    /// A repetition count. Several `Rep` fragments on one statement form a
    /// per-round rep scheme (21-15-9).
    Rep(u32),
    /// A named movement ("Thrusters").
    Effort(String),
    /// Load prescription.
    Resistance {
        /// Magnitude.
        value: f64,
        /// Unit label ("kg", "lb").
        unit: String,
    },
    /// Distance prescription.
    Distance {
        /// Magnitude.
        value: f64,
        /// Unit label ("m", "km").
        unit: String,
    },
    /// A named action verb ("rest", "skip").
    Action(String),
    /// Free-form display label.
    Label(String),
    /// Current/total round counter, maintained at runtime.
    CurrentRound {
        /// 1-based current round.
        current: u32,
        /// Total rounds when bounded.
        total: Option<u32>,
    },
    /// Elapsed execution time.
    Elapsed(DurationMs),
    /// Total (target) time.
    Total(DurationMs),
    /// Recorded start/stop spans.
    Spans(Vec<TimeSpan>),
    /// A wall-clock timestamp.
    SystemTime(EpochMs),
    /// Plain text.
    Text(String),
}

impl FragmentValue {
    /// The discriminant-only kind of this value.
    pub fn kind(&self) -> FragmentKind {
        match self {
            FragmentValue::Timer { .. } => FragmentKind::Timer,
            FragmentValue::Rounds(_) => FragmentKind::Rounds,
            FragmentValue::Rep(_) => FragmentKind::Rep,
            FragmentValue::Effort(_) => FragmentKind::Effort,
            FragmentValue::Resistance { .. } => FragmentKind::Resistance,
            FragmentValue::Distance { .. } => FragmentKind::Distance,
            FragmentValue::Action(_) => FragmentKind::Action,
            FragmentValue::Label(_) => FragmentKind::Label,
            FragmentValue::CurrentRound { .. } => FragmentKind::CurrentRound,
            FragmentValue::Elapsed(_) => FragmentKind::Elapsed,
            FragmentValue::Total(_) => FragmentKind::Total,
            FragmentValue::Spans(_) => FragmentKind::Spans,
            FragmentValue::SystemTime(_) => FragmentKind::SystemTime,
            FragmentValue::Text(_) => FragmentKind::Text,
        }
    }
}

/// Discriminant mirror of [`FragmentValue`], used as the grouping key in
/// precedence resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    /// See [`FragmentValue::Timer`].
    Timer,
    /// See [`FragmentValue::Rounds`].
    Rounds,
    /// See [`FragmentValue::Rep`].
    Rep,
    /// See [`FragmentValue::Effort`].
    Effort,
    /// See [`FragmentValue::Resistance`].
    Resistance,
    /// See [`FragmentValue::Distance`].
    Distance,
    /// See [`FragmentValue::Action`].
    Action,
    /// See [`FragmentValue::Label`].
    Label,
    /// See [`FragmentValue::CurrentRound`].
    CurrentRound,
    /// See [`FragmentValue::Elapsed`].
    Elapsed,
    /// See [`FragmentValue::Total`].
    Total,
    /// See [`FragmentValue::Spans`].
    Spans,
    /// See [`FragmentValue::SystemTime`].
    SystemTime,
    /// See [`FragmentValue::Text`].
    Text,
}

impl Display for FragmentKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FragmentKind::Timer => "timer",
            FragmentKind::Rounds => "rounds",
            FragmentKind::Rep => "rep",
            FragmentKind::Effort => "effort",
            FragmentKind::Resistance => "resistance",
            FragmentKind::Distance => "distance",
            FragmentKind::Action => "action",
            FragmentKind::Label => "label",
            FragmentKind::CurrentRound => "current-round",
            FragmentKind::Elapsed => "elapsed",
            FragmentKind::Total => "total",
            FragmentKind::Spans => "spans",
            FragmentKind::SystemTime => "system-time",
            FragmentKind::Text => "text",
        };
        f.write_str(name)
    }
}

/// A tagged value with provenance. `image` preserves the source text the
/// parser derived the fragment from, when there was one.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// The typed payload.
    pub value: FragmentValue,
    /// Provenance, used for precedence resolution.
    pub origin: Origin,
    /// Source text, for parser-derived fragments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

impl Fragment {
    /// A fragment with the given origin and no source image.
    pub fn new(value: FragmentValue, origin: Origin) -> Fragment {
        Fragment {
            value,
            origin,
            image: None,
        }
    }

    /// Parser-origin fragment.
    pub fn parser(value: FragmentValue) -> Fragment {
        Fragment::new(value, Origin::Parser)
    }

    /// Compiler-origin fragment.
    pub fn compiler(value: FragmentValue) -> Fragment {
        Fragment::new(value, Origin::Compiler)
    }

    /// Runtime-origin fragment.
    pub fn runtime(value: FragmentValue) -> Fragment {
        Fragment::new(value, Origin::Runtime)
    }

    /// User-origin fragment.
    pub fn user(value: FragmentValue) -> Fragment {
        Fragment::new(value, Origin::User)
    }

    /// The discriminant-only kind.
    pub fn kind(&self) -> FragmentKind {
        self.value.kind()
    }

    /// Attaches the source text this fragment was parsed from.
    pub fn with_image(mut self, image: impl Into<String>) -> Fragment {
        self.image = Some(image.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_rank_total_order() {
        let mut origins = [Origin::User, Origin::Parser, Origin::Runtime, Origin::Compiler];
        origins.sort_by_key(|o| o.rank());
        assert_eq!(
            origins,
            [Origin::Parser, Origin::Compiler, Origin::Runtime, Origin::User]
        );
    }

    #[test]
    fn kind_matches_value() {
        let frag = Fragment::parser(FragmentValue::Rep(21)).with_image("21");
        assert_eq!(frag.kind(), FragmentKind::Rep);
        assert_eq!(frag.image.as_deref(), Some("21"));

        let timer = Fragment::parser(FragmentValue::Timer {
            duration_ms: Some(DurationMs::from_secs(60)),
            direction: TimerDirection::Down,
        });
        assert_eq!(timer.kind(), FragmentKind::Timer);
    }

    #[test]
    fn fragment_round_trips_through_json() {
        let frag = Fragment::user(FragmentValue::Resistance {
            value: 42.5,
            unit: "kg".into(),
        });
        let json = serde_json::to_string(&frag).unwrap();
        let back: Fragment = serde_json::from_str(&json).unwrap();
        assert_eq!(frag, back);
    }
}
