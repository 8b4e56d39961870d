pub mod auth;
pub mod handshake;
