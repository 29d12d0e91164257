//! Zumi Player - session and artwork-palette core of the Zumi music player
//!
//! The desktop side keeps its credentials in an encrypted [`credentials`]
//! store and validates sessions lazily through [`session`]. The backend side
//! issues session tokens ([`server`], [`jwt`], [`users`]) and serves cached
//! artwork [`palette`]s.

pub mod cipher;
pub mod credentials;
pub mod error;
pub mod jwt;
pub mod palette;
pub mod pin;
pub mod server;
pub mod session;
pub mod users;
