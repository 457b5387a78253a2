//! The closed set of session kinds.

use std::fmt;

/// The lifetime regime of a session.
///
/// Each kind differs only in its accessibility check and in the cost
/// model of acquire, release and close:
///
/// | Kind | Accessible from | Closed by | Acquire bookkeeping |
/// |------|-----------------|-----------|---------------------|
/// | `Confined` | owner thread | owner, explicitly | plain owner-only count |
/// | `Structured` | owner + member threads of its extent | extent exit | none |
/// | `Shared` | any thread | any thread, explicitly | atomic CAS count |
/// | `Implicit` | any thread | collection when unreachable | atomic CAS count |
/// | `Global` | any thread | never | none |
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionKind {
    /// Single-thread confined; cheap, plain checks.
    Confined,
    /// Confined to a dynamically-scoped extent and its member threads.
    Structured,
    /// Multi-thread shared; race-safe via atomics.
    Shared,
    /// Shared, closed automatically once unreachable.
    Implicit,
    /// Never closes.
    Global,
}

impl SessionKind {
    /// Whether sessions of this kind have a fixed owner thread.
    pub fn has_owner(self) -> bool {
        matches!(self, Self::Confined | Self::Structured)
    }

    /// Whether sessions of this kind may be closed with an explicit
    /// `close()` call.
    pub fn is_closeable(self) -> bool {
        matches!(self, Self::Confined | Self::Shared)
    }

    /// Whether sessions of this kind may be touched from more than one
    /// thread without an ownership check.
    pub fn is_shared(self) -> bool {
        matches!(self, Self::Shared | Self::Implicit | Self::Global)
    }
}

impl fmt::Display for SessionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Confined => "confined",
            Self::Structured => "structured",
            Self::Shared => "shared",
            Self::Implicit => "implicit",
            Self::Global => "global",
        };
        f.write_str(name)
    }
}
