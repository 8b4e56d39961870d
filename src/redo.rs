use crate::codec::ParamValue;

/// One replayable command of the current transaction.
///
/// Prepared executions are stored by SQL text rather than statement id:
/// replay happens on a fresh connection where the old server-side ids are
/// meaningless, so statements are re-prepared and the new ids substituted.
#[derive(Debug, Clone, PartialEq)]
pub enum RedoMessage {
    Query(String),
    ChangeDb(String),
    Execute {
        sql: String,
        params: Vec<ParamValue>,
    },
}

/// Ordered buffer of the current transaction's messages, used to replay the
/// transaction on a replacement connection after a transient failure.
///
/// The buffer is bounded: overflowing it flips a sticky "cannot replay"
/// bit for the ongoing transaction. A successful commit or rollback clears
/// both the buffer and the bit.
#[derive(Debug)]
pub struct TransactionSaver {
    messages: Vec<RedoMessage>,
    capacity: usize,
    overflowed: bool,
}

impl TransactionSaver {
    pub fn new(capacity: usize) -> Self {
        Self {
            messages: Vec::new(),
            capacity,
            overflowed: false,
        }
    }

    pub fn record(&mut self, message: RedoMessage) {
        if self.overflowed {
            return;
        }
        if self.messages.len() >= self.capacity {
            self.overflowed = true;
            self.messages.clear();
            return;
        }
        self.messages.push(message);
    }

    pub fn can_replay(&self) -> bool {
        !self.overflowed
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Hand the buffered messages to a replay attempt, leaving the saver
    /// empty.
    pub fn take_messages(&mut self) -> Vec<RedoMessage> {
        std::mem::take(&mut self.messages)
    }

    /// Re-install messages after a successful replay.
    pub fn restore(&mut self, messages: Vec<RedoMessage>) {
        self.messages = messages;
    }

    /// Transaction boundary reached: drop the log and re-enable replay.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.overflowed = false;
    }
}
