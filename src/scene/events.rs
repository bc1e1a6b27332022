use crate::foundation::core::VisualId;

/// Why a visual asked to be redrawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum InvalidationKind {
    /// Desired size changed.
    Measure,
    /// Position or final size changed.
    Arrange,
    /// Appearance changed; geometry did not.
    Render,
}

impl InvalidationKind {
    /// Measure and arrange both move pixels of the whole subtree.
    pub fn is_layout(self) -> bool {
        matches!(self, Self::Measure | Self::Arrange)
    }
}

/// A discrete invalidation notification.
///
/// `source: None` means the originator is unknown and the whole frame must be treated as damaged.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Invalidation {
    /// Reason.
    pub kind: InvalidationKind,
    /// Originating visual, if known.
    pub source: Option<VisualId>,
}

impl Invalidation {
    /// Invalidation attributed to `source`.
    pub fn new(kind: InvalidationKind, source: VisualId) -> Self {
        Self {
            kind,
            source: Some(source),
        }
    }

    /// Invalidation with no known originator.
    pub fn unattributed(kind: InvalidationKind) -> Self {
        Self { kind, source: None }
    }
}

/// A visual was attached, detached, or moved to another parent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StructureChange {
    /// The visual that moved.
    pub element: VisualId,
    /// Parent before the change (`None` when newly attached or previously the root).
    pub old_parent: Option<VisualId>,
    /// Parent after the change (`None` when detached or now the root).
    pub new_parent: Option<VisualId>,
}

/// Everything a scene reports to the compositor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SceneEvent {
    /// Paint or layout invalidation.
    Invalidated(Invalidation),
    /// Structural change.
    StructureChanged(StructureChange),
}

impl From<Invalidation> for SceneEvent {
    fn from(v: Invalidation) -> Self {
        Self::Invalidated(v)
    }
}

impl From<StructureChange> for SceneEvent {
    fn from(v: StructureChange) -> Self {
        Self::StructureChanged(v)
    }
}
