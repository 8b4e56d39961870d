//! Scripted in-process server speaking enough of the wire protocol to
//! exercise the client end-to-end over a loopback socket.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use marlin::Opts;
use marlin::constant::ColumnType;

/// Server-advertised capabilities: the mandatory set plus the modern
/// extras a MariaDB 11 server offers.
const SERVER_CAPS: u64 = 0x0004 // LONG_FLAG
    | 0x0200 // PROTOCOL_41
    | 0x2000 // TRANSACTIONS
    | 0x8000 // SECURE_CONNECTION
    | 0x0002_0000 // MULTI_RESULTS
    | 0x0004_0000 // PS_MULTI_RESULTS
    | 0x0008_0000 // PLUGIN_AUTH
    | 0x0010_0000 // CONNECT_ATTRS
    | 0x0020_0000 // PLUGIN_AUTH_LENENC_CLIENT_DATA
    | 0x0080_0000 // SESSION_TRACK
    | 0x0100_0000 // DEPRECATE_EOF
    | 0x0000_0008; // CONNECT_WITH_DB

#[derive(Debug, Clone)]
pub enum Canned {
    Ok {
        affected: u64,
        last_insert_id: u64,
    },
    Error {
        code: u16,
        state: &'static str,
        message: &'static str,
    },
    Rows {
        columns: Vec<(&'static str, ColumnType)>,
        rows: Vec<Vec<Option<String>>>,
    },
    /// Several results chained with MORE_RESULTS_EXISTS
    Multi(Vec<Canned>),
    /// Drop the connection without replying, once per server; later hits
    /// answer OK (simulates a crashed-and-restarted server)
    DisconnectOnce,
}

pub struct MockServer {
    pub port: u16,
    pub prepares: Arc<AtomicUsize>,
    pub connections: Arc<AtomicUsize>,
}

struct Script {
    rules: HashMap<String, Canned>,
    prepares: Arc<AtomicUsize>,
    connections: Arc<AtomicUsize>,
    tripped: std::sync::atomic::AtomicBool,
}

impl MockServer {
    pub fn start(rules: Vec<(&str, Canned)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let port = listener.local_addr().expect("local addr").port();
        let prepares = Arc::new(AtomicUsize::new(0));
        let connections = Arc::new(AtomicUsize::new(0));

        let script = Arc::new(Script {
            rules: rules
                .into_iter()
                .map(|(sql, canned)| (sql.to_string(), canned))
                .collect(),
            prepares: prepares.clone(),
            connections: connections.clone(),
            tripped: std::sync::atomic::AtomicBool::new(false),
        });

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let script = script.clone();
                thread::spawn(move || {
                    let _ = serve(stream, &script);
                });
            }
        });

        MockServer {
            port,
            prepares,
            connections,
        }
    }

    pub fn opts(&self) -> Opts {
        let mut opts = Opts::default();
        opts.host = "127.0.0.1".to_string();
        opts.port = self.port;
        opts.user = "app".to_string();
        opts.password = Some("secret".to_string());
        opts.connect_timeout = std::time::Duration::from_secs(5);
        opts
    }
}

// ----------------------------------------------------------------------------
// wire helpers
// ----------------------------------------------------------------------------

fn read_packet(stream: &mut TcpStream) -> std::io::Result<(u8, Vec<u8>)> {
    let mut header = [0_u8; 4];
    stream.read_exact(&mut header)?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    let mut payload = vec![0_u8; len];
    stream.read_exact(&mut payload)?;
    Ok((header[3], payload))
}

fn write_packet(stream: &mut TcpStream, seq: u8, payload: &[u8]) -> std::io::Result<()> {
    let mut out = Vec::with_capacity(4 + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes()[..3]);
    out.push(seq);
    out.extend_from_slice(payload);
    stream.write_all(&out)
}

fn lenenc(out: &mut Vec<u8>, value: u64) {
    if value < 251 {
        out.push(value as u8);
    } else if value < (1 << 16) {
        out.push(0xFC);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else {
        out.push(0xFD);
        out.extend_from_slice(&(value as u32).to_le_bytes()[..3]);
    }
}

fn lenenc_str(out: &mut Vec<u8>, s: &str) {
    lenenc(out, s.len() as u64);
    out.extend_from_slice(s.as_bytes());
}

fn ok_payload(header: u8, affected: u64, last_insert_id: u64, status: u16) -> Vec<u8> {
    let mut out = vec![header];
    lenenc(&mut out, affected);
    lenenc(&mut out, last_insert_id);
    out.extend_from_slice(&status.to_le_bytes());
    out.extend_from_slice(&0_u16.to_le_bytes());
    out
}

fn err_payload(code: u16, state: &str, message: &str) -> Vec<u8> {
    let mut out = vec![0xFF];
    out.extend_from_slice(&code.to_le_bytes());
    out.push(b'#');
    out.extend_from_slice(state.as_bytes());
    out.extend_from_slice(message.as_bytes());
    out
}

fn column_def(name: &str, ty: ColumnType) -> Vec<u8> {
    let mut out = Vec::new();
    lenenc_str(&mut out, "def");
    lenenc_str(&mut out, "test");
    lenenc_str(&mut out, "t");
    lenenc_str(&mut out, "t");
    lenenc_str(&mut out, name);
    lenenc_str(&mut out, name);
    out.push(0x0C);
    out.extend_from_slice(&33_u16.to_le_bytes());
    out.extend_from_slice(&255_u32.to_le_bytes());
    out.push(ty as u8);
    out.extend_from_slice(&0_u16.to_le_bytes());
    out.push(0);
    out.extend_from_slice(&0_u16.to_le_bytes());
    out
}

fn text_row(cells: &[Option<String>]) -> Vec<u8> {
    let mut out = Vec::new();
    for cell in cells {
        match cell {
            Some(value) => lenenc_str(&mut out, value),
            None => out.push(0xFB),
        }
    }
    out
}

// ----------------------------------------------------------------------------
// connection handling
// ----------------------------------------------------------------------------

fn send_initial_handshake(stream: &mut TcpStream, thread_id: u32) -> std::io::Result<()> {
    let mut out = vec![10];
    out.extend_from_slice(b"11.4.2-MariaDB\0");
    out.extend_from_slice(&thread_id.to_le_bytes());
    out.extend_from_slice(b"abcdefgh"); // seed part 1
    out.push(0);
    out.extend_from_slice(&(SERVER_CAPS as u16).to_le_bytes());
    out.push(45); // utf8mb4
    out.extend_from_slice(&0x0002_u16.to_le_bytes()); // autocommit
    out.extend_from_slice(&((SERVER_CAPS >> 16) as u16).to_le_bytes());
    out.push(21); // seed length + 1
    out.extend_from_slice(&[0_u8; 6]);
    out.extend_from_slice(&((SERVER_CAPS >> 32) as u32).to_le_bytes());
    out.extend_from_slice(b"ijklmnopqrst"); // seed part 2
    out.push(0);
    out.extend_from_slice(b"mysql_native_password\0");
    write_packet(stream, 0, &out)
}

/// Respond to one canned result; returns the next sequence number.
fn send_canned(
    stream: &mut TcpStream,
    mut seq: u8,
    canned: &Canned,
    more_after: bool,
    status_base: u16,
) -> std::io::Result<u8> {
    let trailing_status = status_base | if more_after { 0x0008_u16 } else { 0 };
    match canned {
        Canned::Ok {
            affected,
            last_insert_id,
        } => {
            let payload = ok_payload(0x00, *affected, *last_insert_id, trailing_status);
            write_packet(stream, seq, &payload)?;
            seq = seq.wrapping_add(1);
        }
        Canned::Error {
            code,
            state,
            message,
        } => {
            write_packet(stream, seq, &err_payload(*code, state, message))?;
            seq = seq.wrapping_add(1);
        }
        Canned::Rows { columns, rows } => {
            let mut count = Vec::new();
            lenenc(&mut count, columns.len() as u64);
            write_packet(stream, seq, &count)?;
            seq = seq.wrapping_add(1);
            for (name, ty) in columns {
                write_packet(stream, seq, &column_def(name, *ty))?;
                seq = seq.wrapping_add(1);
            }
            for row in rows {
                write_packet(stream, seq, &text_row(row))?;
                seq = seq.wrapping_add(1);
            }
            // OK-EOF terminator (DEPRECATE_EOF is always negotiated here)
            let payload = ok_payload(0xFE, 0, 0, trailing_status);
            write_packet(stream, seq, &payload)?;
            seq = seq.wrapping_add(1);
        }
        Canned::Multi(parts) => {
            for (i, part) in parts.iter().enumerate() {
                let more = more_after || i + 1 < parts.len();
                seq = send_canned(stream, seq, part, more, status_base)?;
            }
        }
        Canned::DisconnectOnce => unreachable!("handled by respond_to_query"),
    }
    Ok(seq)
}

/// Returns false when the connection should be dropped without a reply.
fn respond_to_query(
    stream: &mut TcpStream,
    script: &Script,
    sql: &str,
    status_base: u16,
) -> std::io::Result<bool> {
    if let Some(canned) = script.rules.get(sql) {
        if matches!(canned, Canned::DisconnectOnce)
            && !script.tripped.swap(true, Ordering::AcqRel)
        {
            return Ok(false);
        }
        if !matches!(canned, Canned::DisconnectOnce) {
            send_canned(stream, 1, canned, false, status_base)?;
            return Ok(true);
        }
    }

    if sql == "SELECT @@max_allowed_packet, @@wait_timeout" {
        let canned = Canned::Rows {
            columns: vec![
                ("@@max_allowed_packet", ColumnType::MYSQL_TYPE_LONGLONG),
                ("@@wait_timeout", ColumnType::MYSQL_TYPE_LONGLONG),
            ],
            rows: vec![vec![Some("16777216".to_string()), Some("28800".to_string())]],
        };
        send_canned(stream, 1, &canned, false, status_base)?;
        return Ok(true);
    }

    // session setup, KILL, COMMIT and friends all get a plain OK
    send_canned(
        stream,
        1,
        &Canned::Ok {
            affected: 0,
            last_insert_id: 0,
        },
        false,
        status_base,
    )?;
    Ok(true)
}

fn respond_to_prepare(
    stream: &mut TcpStream,
    script: &Script,
    sql: &str,
) -> std::io::Result<()> {
    script.prepares.fetch_add(1, Ordering::AcqRel);
    let num_params = sql.bytes().filter(|&b| b == b'?').count() as u16;
    let columns: Vec<(&str, ColumnType)> = match script.rules.get(sql) {
        Some(Canned::Rows { columns, .. }) => columns.clone(),
        _ => Vec::new(),
    };

    let mut out = vec![0x00];
    out.extend_from_slice(&42_u32.to_le_bytes()); // statement id
    out.extend_from_slice(&(columns.len() as u16).to_le_bytes());
    out.extend_from_slice(&num_params.to_le_bytes());
    out.push(0);
    out.extend_from_slice(&0_u16.to_le_bytes());
    write_packet(stream, 1, &out)?;

    let mut seq = 2;
    for _ in 0..num_params {
        write_packet(stream, seq, &column_def("?", ColumnType::MYSQL_TYPE_VAR_STRING))?;
        seq += 1;
    }
    for (name, ty) in &columns {
        write_packet(stream, seq, &column_def(name, *ty))?;
        seq += 1;
    }
    Ok(())
}

fn respond_to_execute(stream: &mut TcpStream, script: &Script, sql: &str) -> std::io::Result<()> {
    match script.rules.get(sql) {
        Some(Canned::Rows { columns, rows }) => {
            let mut count = Vec::new();
            lenenc(&mut count, columns.len() as u64);
            write_packet(stream, 1, &count)?;
            let mut seq = 2;
            for (name, ty) in columns {
                write_packet(stream, seq, &column_def(name, *ty))?;
                seq += 1;
            }
            for row in rows {
                write_packet(stream, seq, &binary_row(columns, row))?;
                seq += 1;
            }
            let payload = ok_payload(0xFE, 0, 0, 0x0002);
            write_packet(stream, seq, &payload)?;
        }
        Some(Canned::DisconnectOnce) => {}
        Some(canned) => {
            send_canned(stream, 1, canned, false, 0x0002)?;
        }
        None => {
            send_canned(
                stream,
                1,
                &Canned::Ok {
                    affected: 1,
                    last_insert_id: 0,
                },
                false,
                0x0002,
            )?;
        }
    }
    Ok(())
}

fn binary_row(columns: &[(&str, ColumnType)], cells: &[Option<String>]) -> Vec<u8> {
    let mut out = vec![0x00];
    let bitmap_len = (columns.len() + 7 + 2) / 8;
    let bitmap_start = out.len();
    out.resize(bitmap_start + bitmap_len, 0);
    for (i, cell) in cells.iter().enumerate() {
        if cell.is_none() {
            let bit = i + 2;
            out[bitmap_start + (bit >> 3)] |= 1 << (bit & 7);
        }
    }
    for (i, cell) in cells.iter().enumerate() {
        let Some(value) = cell else { continue };
        match columns[i].1 {
            ColumnType::MYSQL_TYPE_LONG => {
                let v: i32 = value.parse().expect("int cell");
                out.extend_from_slice(&v.to_le_bytes());
            }
            ColumnType::MYSQL_TYPE_LONGLONG => {
                let v: i64 = value.parse().expect("int cell");
                out.extend_from_slice(&v.to_le_bytes());
            }
            _ => lenenc_str(&mut out, value),
        }
    }
    out
}

fn serve(mut stream: TcpStream, script: &Script) -> std::io::Result<()> {
    let thread_id = script.connections.fetch_add(1, Ordering::AcqRel) as u32 + 100;
    send_initial_handshake(&mut stream, thread_id)?;

    // handshake response; credentials are not verified
    let _ = read_packet(&mut stream)?;
    write_packet(&mut stream, 2, &ok_payload(0x00, 0, 0, 0x0002))?;

    let mut in_txn = false;
    loop {
        let (_, command) = match read_packet(&mut stream) {
            Ok(packet) => packet,
            Err(_) => return Ok(()), // peer went away
        };
        let Some(&opcode) = command.first() else {
            return Ok(());
        };

        match opcode {
            0x01 => return Ok(()), // QUIT
            0x0E => write_packet(&mut stream, 1, &ok_payload(0x00, 0, 0, 0x0002))?, // PING
            0x1F => {
                in_txn = false;
                write_packet(&mut stream, 1, &ok_payload(0x00, 0, 0, 0x0002))?
            }
            0x03 => {
                let sql = String::from_utf8_lossy(&command[1..]).into_owned();
                match sql.as_str() {
                    "BEGIN" | "START TRANSACTION" => in_txn = true,
                    "COMMIT" | "ROLLBACK" => in_txn = false,
                    _ => {}
                }
                let status = 0x0002 | if in_txn { 0x0001 } else { 0 };
                if !respond_to_query(&mut stream, script, &sql, status)? {
                    return Ok(()); // scripted disconnect
                }
            }
            0x16 => {
                let sql = String::from_utf8_lossy(&command[1..]).into_owned();
                respond_to_prepare(&mut stream, script, &sql)?;
                // remember the SQL for the next execute
                LAST_PREPARED.with_borrow_mut(|slot| *slot = Some(sql));
            }
            0x17 => {
                let sql = LAST_PREPARED.with_borrow(|slot| slot.clone()).unwrap_or_default();
                respond_to_execute(&mut stream, script, &sql)?;
            }
            0x18 => {} // STMT_SEND_LONG_DATA: no reply
            0x19 => {} // STMT_CLOSE: no reply
            0x02 => write_packet(&mut stream, 1, &ok_payload(0x00, 0, 0, 0x0002))?, // INIT_DB
            0x1A => write_packet(&mut stream, 1, &ok_payload(0x00, 0, 0, 0x0002))?, // STMT_RESET
            0x1B => write_packet(&mut stream, 1, &ok_payload(0x00, 0, 0, 0x0002))?, // SET_OPTION
            _ => write_packet(
                &mut stream,
                1,
                &err_payload(1047, "08S01", "unknown command"),
            )?,
        }
    }
}

thread_local! {
    static LAST_PREPARED: std::cell::RefCell<Option<String>> =
        const { std::cell::RefCell::new(None) };
}
