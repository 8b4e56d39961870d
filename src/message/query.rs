use crate::constant::CommandByte;
use crate::error::Result;
use crate::protocol::primitive::write_int_1;

use super::{ClientMessage, summarize_sql};

/// COM_QUERY: text protocol statement.
#[derive(Debug)]
pub struct QueryMessage<'a> {
    pub sql: &'a str,
}

impl<'a> QueryMessage<'a> {
    pub fn new(sql: &'a str) -> Self {
        Self { sql }
    }
}

impl ClientMessage for QueryMessage<'_> {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        write_int_1(out, CommandByte::Query as u8);
        out.extend_from_slice(self.sql.as_bytes());
        Ok(())
    }

    fn description(&self) -> String {
        format!("QUERY: {}", summarize_sql(self.sql))
    }

    fn is_redoable(&self) -> bool {
        true
    }
}

/// COM_INIT_DB: switch the current schema.
#[derive(Debug)]
pub struct ChangeDbMessage<'a> {
    pub database: &'a str,
}

impl<'a> ChangeDbMessage<'a> {
    pub fn new(database: &'a str) -> Self {
        Self { database }
    }
}

impl ClientMessage for ChangeDbMessage<'_> {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        write_int_1(out, CommandByte::InitDb as u8);
        out.extend_from_slice(self.database.as_bytes());
        Ok(())
    }

    fn description(&self) -> String {
        format!("INIT_DB: {}", self.database)
    }

    fn is_redoable(&self) -> bool {
        true
    }
}
