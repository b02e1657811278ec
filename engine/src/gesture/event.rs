//! Gesture events emitted by the head and hand classifiers.

/// Subject identifier assigned by the upstream face detector.
pub type SubjectId = u32;
/// Hand identifier assigned by the upstream hand detector.
pub type HandId = u32;

// ── Gesture types ──────────────────────────────────────────

/// Recognized voting gestures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gesture {
    /// Head nod (pitch swing and reversal).
    Yes,
    /// Head shake (yaw swing and reversal).
    No,
    /// Thumb tip held above the index tip.
    ThumbsUp,
    /// Thumb tip held below the index tip.
    ThumbsDown,
}

impl Gesture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::ThumbsUp => "thumbs-up",
            Self::ThumbsDown => "thumbs-down",
        }
    }

    /// The vote a gesture casts. Hand and head gestures tally together.
    pub fn vote(&self) -> Vote {
        match self {
            Self::Yes | Self::ThumbsUp => Vote::Yes,
            Self::No | Self::ThumbsDown => Vote::No,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Vote {
    Yes,
    No,
}

impl Vote {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
        }
    }
}

/// Which classifier produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GestureSource {
    Head,
    Hand,
}

impl GestureSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Head => "head",
            Self::Hand => "hand",
        }
    }
}

// ── Events ─────────────────────────────────────────────────

/// A debounced, confidence-scored gesture.
#[derive(Debug, Clone, PartialEq)]
pub struct GestureEvent {
    pub source: GestureSource,
    /// Subject id for head gestures, hand id for hand gestures.
    pub id: u32,
    pub gesture: Gesture,
    /// In `[0, 1]`.
    pub confidence: f32,
    pub timestamp_ms: f64,
}

impl GestureEvent {
    pub fn to_sexp(&self) -> String {
        format!(
            "(:type :event :event :gesture :source :{} :id {} :gesture :{} :vote :{} :confidence {:.3} :t {:.0})",
            self.source.as_str(),
            self.id,
            self.gesture.as_str(),
            self.gesture.vote().as_str(),
            self.confidence,
            self.timestamp_ms,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_mapping() {
        assert_eq!(Gesture::Yes.vote(), Vote::Yes);
        assert_eq!(Gesture::ThumbsUp.vote(), Vote::Yes);
        assert_eq!(Gesture::No.vote(), Vote::No);
        assert_eq!(Gesture::ThumbsDown.vote(), Vote::No);
    }

    #[test]
    fn test_event_sexp() {
        let e = GestureEvent {
            source: GestureSource::Hand,
            id: 2,
            gesture: Gesture::ThumbsDown,
            confidence: 0.5,
            timestamp_ms: 1234.4,
        };
        let s = e.to_sexp();
        assert!(s.starts_with("(:type :event :event :gesture"));
        assert!(s.contains(":source :hand"));
        assert!(s.contains(":id 2"));
        assert!(s.contains(":gesture :thumbs-down"));
        assert!(s.contains(":vote :no"));
        assert!(s.contains(":confidence 0.500"));
        assert!(s.contains(":t 1234"));
        assert!(lexpr::from_str(&s).is_ok(), "not a valid s-expression: {}", s);
    }
}
