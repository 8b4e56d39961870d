//! Typed client commands.
//!
//! Every message knows how to encode itself into a command payload, how
//! many response sequences the server will send back (for pipelining), a
//! human description for error attachment, and whether it can be recorded
//! and replayed inside a transaction.

pub mod prepared;
pub mod query;
pub mod utility;

pub use prepared::{
    CloseStmtMessage, ExecuteMessage, LongDataMessage, PrepareMessage, ResetStmtMessage,
};
pub use query::{ChangeDbMessage, QueryMessage};
pub use utility::{PingMessage, QuitMessage, ResetConnectionMessage, SetOptionMessage};

use crate::error::Result;

pub trait ClientMessage {
    /// Append the command payload (including the command byte).
    fn encode(&self, out: &mut Vec<u8>) -> Result<()>;

    /// Human description attached to errors ("QUERY: select …").
    fn description(&self) -> String;

    /// Number of response sequences this command produces. Fire-and-forget
    /// commands (QUIT, STMT_CLOSE, LONG_DATA) produce none.
    fn expected_response_count(&self) -> usize {
        1
    }

    /// Whether the message may be buffered for transaction replay.
    fn is_redoable(&self) -> bool {
        false
    }
}

/// Truncate long SQL for error descriptions.
pub(crate) fn summarize_sql(sql: &str) -> &str {
    const LIMIT: usize = 120;
    if sql.len() <= LIMIT {
        sql
    } else {
        let mut end = LIMIT;
        while !sql.is_char_boundary(end) {
            end -= 1;
        }
        &sql[..end]
    }
}
