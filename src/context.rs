use crate::constant::{CapabilityFlags, ServerStatusFlags};
use crate::opts::IsolationLevel;
use crate::protocol::response::OkPayload;

/// Parsed server version. MariaDB servers behind replication announce
/// themselves with a `5.5.5-` prefix which is stripped here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
    pub mariadb: bool,
    pub raw: String,
}

impl ServerVersion {
    pub fn parse(raw: &str) -> Self {
        let mariadb = raw.contains("MariaDB");
        let version = raw.strip_prefix("5.5.5-").unwrap_or(raw);

        let mut parts = [0_u16; 3];
        for (slot, segment) in parts.iter_mut().zip(version.split(['.', '-'])) {
            let digits: String = segment.chars().take_while(char::is_ascii_digit).collect();
            *slot = digits.parse().unwrap_or(0);
        }

        Self {
            major: parts[0],
            minor: parts[1],
            patch: parts[2],
            mariadb,
            raw: raw.to_string(),
        }
    }

    pub fn at_least(&self, major: u16, minor: u16, patch: u16) -> bool {
        (self.major, self.minor, self.patch) >= (major, minor, patch)
    }
}

bitflags::bitflags! {
    /// Session state that diverged from the pool defaults since connect.
    /// A connection with any bit set is reset (or discarded) before reuse.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StateChange: u8 {
        const NETWORK_TIMEOUT = 0x01;
        const DATABASE = 0x02;
        const READ_ONLY = 0x04;
        const AUTOCOMMIT = 0x08;
        const TRANSACTION_ISOLATION = 0x10;
    }
}

/// Per-connection state, exclusively owned by its session.
#[derive(Debug, Clone)]
pub struct Context {
    /// Negotiated capability bitmask, immutable after the handshake
    pub capabilities: CapabilityFlags,
    pub server_version: ServerVersion,
    /// Server-side connection (thread) id, target of KILL QUERY
    pub thread_id: u32,
    /// Status bits from the last OK/EOF packet
    pub status: ServerStatusFlags,
    pub database: Option<String>,
    pub warnings: u16,
    pub isolation: Option<IsolationLevel>,
    pub state_flags: StateChange,
    /// Server-side limit on a single logical command; 0 until known
    pub max_allowed_packet: usize,
    pub wait_timeout: Option<u64>,
}

impl Context {
    pub fn new(
        capabilities: CapabilityFlags,
        server_version: ServerVersion,
        thread_id: u32,
        status: ServerStatusFlags,
        database: Option<String>,
    ) -> Self {
        Self {
            capabilities,
            server_version,
            thread_id,
            status,
            database,
            warnings: 0,
            isolation: None,
            state_flags: StateChange::empty(),
            max_allowed_packet: 0,
            wait_timeout: None,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.status
            .contains(ServerStatusFlags::SERVER_STATUS_IN_TRANS)
    }

    pub fn more_results(&self) -> bool {
        self.status
            .contains(ServerStatusFlags::SERVER_MORE_RESULTS_EXISTS)
    }

    pub fn eof_deprecated(&self) -> bool {
        self.capabilities
            .contains(CapabilityFlags::CLIENT_DEPRECATE_EOF)
    }

    /// Record the status bits and tracked state of an OK packet.
    pub fn update_from_ok(&mut self, ok: &OkPayload) {
        self.status = ok.status_flags;
        self.warnings = ok.warnings;
        if let Some(schema) = &ok.schema_change {
            self.database = Some(schema.clone());
            self.state_flags |= StateChange::DATABASE;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_parse_mariadb() {
        let v = ServerVersion::parse("11.4.2-MariaDB-log");
        assert_eq!((v.major, v.minor, v.patch), (11, 4, 2));
        assert!(v.mariadb);
        assert!(v.at_least(10, 5, 0));
        assert!(!v.at_least(11, 5, 0));
    }

    #[test]
    fn test_version_parse_replication_prefix() {
        let v = ServerVersion::parse("5.5.5-10.6.17-MariaDB");
        assert_eq!((v.major, v.minor, v.patch), (10, 6, 17));
        assert!(v.mariadb);
    }

    #[test]
    fn test_version_parse_mysql() {
        let v = ServerVersion::parse("8.0.36");
        assert_eq!((v.major, v.minor, v.patch), (8, 0, 36));
        assert!(!v.mariadb);
    }

    #[test]
    fn test_update_from_ok_tracks_schema() {
        let mut ctx = Context::new(
            CapabilityFlags::empty(),
            ServerVersion::parse("8.0.36"),
            1,
            ServerStatusFlags::empty(),
            None,
        );
        let ok = OkPayload {
            status_flags: ServerStatusFlags::SERVER_STATUS_IN_TRANS,
            schema_change: Some("analytics".into()),
            ..OkPayload::default()
        };
        ctx.update_from_ok(&ok);
        assert!(ctx.in_transaction());
        assert_eq!(ctx.database.as_deref(), Some("analytics"));
        assert!(ctx.state_flags.contains(StateChange::DATABASE));
    }
}
