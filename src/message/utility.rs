use crate::constant::CommandByte;
use crate::error::Result;
use crate::protocol::primitive::{write_int_1, write_int_2};

use super::ClientMessage;

/// COM_PING
#[derive(Debug)]
pub struct PingMessage;

impl ClientMessage for PingMessage {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        write_int_1(out, CommandByte::Ping as u8);
        Ok(())
    }

    fn description(&self) -> String {
        "PING".to_string()
    }
}

/// COM_QUIT. The server closes the socket instead of replying.
#[derive(Debug)]
pub struct QuitMessage;

impl ClientMessage for QuitMessage {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        write_int_1(out, CommandByte::Quit as u8);
        Ok(())
    }

    fn description(&self) -> String {
        "QUIT".to_string()
    }

    fn expected_response_count(&self) -> usize {
        0
    }
}

/// COM_RESET_CONNECTION: reset session state without re-authenticating.
#[derive(Debug)]
pub struct ResetConnectionMessage;

impl ClientMessage for ResetConnectionMessage {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        write_int_1(out, CommandByte::ResetConnection as u8);
        Ok(())
    }

    fn description(&self) -> String {
        "RESET_CONNECTION".to_string()
    }
}

/// COM_SET_OPTION: toggle multi-statement support.
#[derive(Debug)]
pub struct SetOptionMessage {
    pub multi_statements: bool,
}

impl ClientMessage for SetOptionMessage {
    fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        write_int_1(out, CommandByte::SetOption as u8);
        write_int_2(out, if self.multi_statements { 0 } else { 1 });
        Ok(())
    }

    fn description(&self) -> String {
        "SET_OPTION".to_string()
    }
}
