use core::fmt;

/// A participant's position in the enclosing runtime's global rank space.
///
/// Opaque outside of ordering and equality: the core never does arithmetic on a `Rank` directly,
/// only on the `this_rank_index` derived from where it sits in a [`ParticipantSet`]'s ordered
/// rank list.
///
/// [`ParticipantSet`]: crate::ParticipantSet
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Rank(pub usize);

impl Rank {
    #[must_use]
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, fmt)
    }
}

impl From<usize> for Rank {
    fn from(index: usize) -> Self {
        Self(index)
    }
}

/// The three participant-set kinds a reduction may run over. Each has its own key space in the
/// [`Registry`](crate::Registry) and [`StateStore`](crate::StateStore) of the core crate.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum ParticipantKind {
    /// A virtual collection of locally-aggregated elements.
    Collection,
    /// A process subgroup, possibly excluding some ranks of the default group.
    Subgroup,
    /// An object group (one participant per registered object, one per rank).
    ObjectGroup,
}

impl fmt::Display for ParticipantKind {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Collection => "collection",
            Self::Subgroup => "subgroup",
            Self::ObjectGroup => "object-group",
        };
        fmt.write_str(name)
    }
}

/// A stable `(kind, id)` key identifying one participant set. `id` is an opaque handle minted by
/// the participant-set services this core treats as an external collaborator (see §6 of the
/// specification this crate implements).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ParticipantSetKey {
    pub kind: ParticipantKind,
    pub id: u64,
}

impl ParticipantSetKey {
    #[must_use]
    pub fn new(kind: ParticipantKind, id: u64) -> Self {
        Self { kind, id }
    }
}

impl fmt::Display for ParticipantSetKey {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}#{}", self.kind, self.id)
    }
}

/// A densely-allocated, per-participant-set sequence id identifying one in-flight (or completed
/// and since reused) reduction instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct InstanceId(pub u64);

impl InstanceId {
    #[must_use]
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, fmt)
    }
}
