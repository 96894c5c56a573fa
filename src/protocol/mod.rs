//! Wire protocol
//!
//! Length-prefixed JSON frames with a fixed opcode vocabulary. Both the
//! client session and the server session handler speak it through
//! [`read_message`] and [`write_message`].
//!
//! # Example Usage
//!
//! ```ignore
//! use mirrord::protocol::{write_message, read_message, Message, Opcode};
//!
//! write_message(&mut stream, &Message::new(Opcode::Ping, "")).await?;
//! let ack = read_message(&mut stream).await?;
//! assert_eq!(ack.opcode, Opcode::Ok);
//! ```

pub mod codec;
pub mod error;
pub mod types;

pub use codec::{decode_body, encode, parse_length, read_message, write_message};
pub use error::ProtocolError;
pub use types::{Message, Opcode};

// vim: ts=4
