use crate::constant::{
    CAPABILITIES_CONFIGURABLE, CAPABILITIES_DEFAULT, CAPABILITIES_MANDATORY, CapabilityFlags,
    ServerStatusFlags,
};
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::primitive::*;
use crate::protocol::response::{ErrPayload, ErrPayloadBytes};

/// Client-advertised maximum packet size (1 GiB).
pub const CLIENT_MAX_PACKET: u32 = 0x4000_0000;

/// Collation sent in the handshake response (utf8mb4_general_ci).
pub const CLIENT_COLLATION: u8 = 45;

/// Initial handshake packet from server (protocol version 10)
///
/// First packet after the TCP connection: server capabilities, the
/// authentication seed and the default auth plugin name.
///
/// ```text
/// 1   [0a] protocol version
/// n   server version (null-terminated string)
/// 4   connection id
/// 8   auth seed part 1
/// 1   [00] filler
/// 2   capability flags (lower 2 bytes)
/// 1   character set
/// 2   status flags
/// 2   capability flags (upper 2 bytes)
/// 1   auth plugin data length
/// 6   reserved
/// 4   MariaDB extended capabilities (reserved on MySQL)
/// n   auth seed part 2
/// n   auth plugin name (null-terminated)
/// ```
#[derive(Debug, Clone)]
pub struct InitialHandshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub seed: Vec<u8>,
    pub capabilities: CapabilityFlags,
    pub charset: u8,
    pub status_flags: ServerStatusFlags,
    pub auth_plugin_name: String,
}

impl InitialHandshake {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (protocol_version, data) = read_int_1(payload)?;

        // A server refusing the connection answers with ERR instead of a
        // handshake; the socket has to be closed.
        if protocol_version == 0xFF {
            let err = ErrPayload::try_from(ErrPayloadBytes(payload))?;
            return Err(Error::Server(err));
        }
        if protocol_version != 10 {
            return Err(Error::Connection(format!(
                "unsupported protocol version {protocol_version}"
            )));
        }

        let (server_version, data) = read_string_null(data)?;
        let server_version = String::from_utf8_lossy(server_version).into_owned();
        let is_mariadb = server_version.contains("MariaDB");

        let (connection_id, data) = read_int_4(data)?;
        let (seed_part_1, data) = read_string_fix(data, 8)?;
        let (_filler, data) = read_int_1(data)?;
        let (cap_lower, data) = read_int_2(data)?;
        let (charset, data) = read_int_1(data)?;
        let (status_flags, data) = read_int_2(data)?;
        let status_flags = ServerStatusFlags::from_bits_truncate(status_flags);
        let (cap_upper, data) = read_int_2(data)?;
        let (seed_len, data) = read_int_1(data)?;
        let (_reserved, data) = read_string_fix(data, 6)?;
        let (cap_extended, data) = read_int_4(data)?;

        let mut capability_bits = ((cap_upper as u64) << 16) | cap_lower as u64;
        if is_mariadb {
            capability_bits |= (cap_extended as u64) << 32;
        }
        let capabilities = CapabilityFlags::from_bits_truncate(capability_bits);

        // seed part 2; its trailing NUL is not part of the seed
        let part_2_len = (seed_len as usize).saturating_sub(9).max(12);
        let (seed_part_2, data) = read_string_fix(data, part_2_len)?;
        let (_filler, data) = read_int_1(data)?;

        let mut seed = Vec::with_capacity(8 + part_2_len);
        seed.extend_from_slice(seed_part_1);
        seed.extend_from_slice(seed_part_2);

        // plugin name; some servers omit the terminating NUL
        let auth_plugin_name = match read_string_null(data) {
            Ok((name, _)) => name,
            Err(_) => data,
        };
        let auth_plugin_name = String::from_utf8_lossy(auth_plugin_name).into_owned();

        Ok(Self {
            protocol_version,
            server_version,
            connection_id,
            seed,
            capabilities,
            charset,
            status_flags,
            auth_plugin_name,
        })
    }
}

/// Effective client capabilities: `(requested ∩ advertised) ∪ mandatory`.
/// Fails when the server lacks a mandatory capability.
pub fn negotiate_capabilities(opts: &Opts, server: CapabilityFlags) -> Result<CapabilityFlags> {
    let missing = CAPABILITIES_MANDATORY.difference(server);
    if !missing.is_empty() {
        return Err(Error::Connection(format!(
            "server lacks required capabilities: {missing:?}"
        )));
    }

    let mut requested = CAPABILITIES_DEFAULT;
    if opts.ssl_mode.enabled() {
        requested |= CapabilityFlags::CLIENT_SSL;
    }
    if opts.db.is_some() {
        requested |= CapabilityFlags::CLIENT_CONNECT_WITH_DB;
    }
    if !opts.connection_attributes.is_empty() {
        requested |= CapabilityFlags::CLIENT_CONNECT_ATTRS;
    }
    if opts.compress {
        requested |= CapabilityFlags::CLIENT_COMPRESS;
    }
    if opts.allow_local_infile {
        requested |= CapabilityFlags::CLIENT_LOCAL_FILES;
    }
    if opts.allow_multi_statements {
        requested |= CapabilityFlags::CLIENT_MULTI_STATEMENTS;
    }
    requested |= CapabilityFlags::CLIENT_SESSION_TRACK;
    debug_assert!(
        requested
            .difference(CAPABILITIES_DEFAULT | CAPABILITIES_CONFIGURABLE)
            .is_empty()
    );

    // SSL is resolved before the handshake response: with ssl_mode enabled
    // but no server support, fail rather than silently downgrade.
    if opts.ssl_mode.enabled() && !server.contains(CapabilityFlags::CLIENT_SSL) {
        return Err(Error::Tls("server does not support TLS".into()));
    }

    Ok((requested & server) | CAPABILITIES_MANDATORY)
}

/// Write the 23-byte filler block: 19 zero bytes followed by the MariaDB
/// extended client capabilities (zero for MySQL servers).
fn write_filler(out: &mut Vec<u8>, capabilities: CapabilityFlags) {
    out.extend_from_slice(&[0_u8; 19]);
    write_int_4(out, (capabilities.bits() >> 32) as u32);
}

/// SSL request packet: the truncated handshake response sent before the
/// TLS upgrade.
pub fn write_ssl_request(out: &mut Vec<u8>, capabilities: CapabilityFlags) {
    write_int_4(out, capabilities.bits() as u32);
    write_int_4(out, CLIENT_MAX_PACKET);
    write_int_1(out, CLIENT_COLLATION);
    write_filler(out, capabilities);
}

/// Handshake response packet (HandshakeResponse41)
#[derive(Debug)]
pub struct HandshakeResponse<'a> {
    pub capabilities: CapabilityFlags,
    pub user: &'a str,
    pub auth_response: &'a [u8],
    pub database: Option<&'a str>,
    pub auth_plugin_name: &'a str,
    pub connection_attributes: &'a [(String, String)],
}

impl HandshakeResponse<'_> {
    pub fn encode(&self, out: &mut Vec<u8>) {
        write_int_4(out, self.capabilities.bits() as u32);
        write_int_4(out, CLIENT_MAX_PACKET);
        write_int_1(out, CLIENT_COLLATION);
        write_filler(out, self.capabilities);

        write_string_null(out, self.user);

        if self
            .capabilities
            .contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA)
        {
            write_bytes_lenenc(out, self.auth_response);
        } else {
            write_int_1(out, self.auth_response.len() as u8);
            out.extend_from_slice(self.auth_response);
        }

        if self
            .capabilities
            .contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB)
        {
            write_string_null(out, self.database.unwrap_or(""));
        }

        write_string_null(out, self.auth_plugin_name);

        if self
            .capabilities
            .contains(CapabilityFlags::CLIENT_CONNECT_ATTRS)
        {
            // the block is prefixed with its own length, so it is built
            // aside and spliced in
            let mut attrs = Vec::new();
            for (key, value) in self.connection_attributes {
                write_string_lenenc(&mut attrs, key);
                write_string_lenenc(&mut attrs, value);
            }
            write_bytes_lenenc(out, &attrs);
        }
    }
}

/// Auth switch request: the server picked a different plugin (0xFE header
/// with a payload too long to be an EOF packet).
#[derive(Debug, Clone)]
pub struct AuthSwitchRequest {
    pub plugin_name: String,
    pub seed: Vec<u8>,
}

impl AuthSwitchRequest {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (header, data) = read_int_1(payload)?;
        if header != 0xFE {
            return Err(Error::Connection("expected auth switch request".into()));
        }

        let (plugin_name, data) = read_string_null(data)?;
        let seed = match data.last() {
            Some(0) => &data[..data.len() - 1],
            _ => data,
        };

        Ok(Self {
            plugin_name: String::from_utf8_lossy(plugin_name).into_owned(),
            seed: seed.to_vec(),
        })
    }
}

#[cfg(test)]
#[path = "handshake_test.rs"]
mod handshake_test;
