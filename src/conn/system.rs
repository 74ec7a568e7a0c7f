/// The system procedures this client may invoke.
///
/// Regular procedure names must match `[A-Za-z0-9_]*` and can never start
/// with `@`; system procedures bypass that check through this explicit
/// allow-list instead of a string escape hatch.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SystemProcedure {
    /// Keep-alive no-op.
    Ping,
    /// Cluster metadata; with selector `OVERVIEW` it lists every node's
    /// client interface, which drives topology discovery.
    SystemInformation,
    /// Server statistics selectors.
    Statistics,
    /// Ad-hoc SQL execution.
    AdHoc,
    /// Cluster shutdown.
    Shutdown,
    /// Starts a snapshot.
    SnapshotSave,
    /// Restores a snapshot.
    SnapshotRestore,
}

impl SystemProcedure {
    /// The on-wire procedure name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ping => "@Ping",
            Self::SystemInformation => "@SystemInformation",
            Self::Statistics => "@Statistics",
            Self::AdHoc => "@AdHoc",
            Self::Shutdown => "@Shutdown",
            Self::SnapshotSave => "@SnapshotSave",
            Self::SnapshotRestore => "@SnapshotRestore",
        }
    }
}

impl std::fmt::Display for SystemProcedure {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Validation applied to user-supplied procedure names before submission.
pub(crate) fn valid_procedure_name(name: &str) -> bool {
    name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
