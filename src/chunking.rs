//! Fixed-size chunking of file contents into `create_file` messages
//!
//! A file of `S` bytes becomes `ceil(S / CHUNK_SIZE)` `create_file`
//! messages sharing the same path, followed by one `eop` for that path.
//! An empty file is just the `eop`.

use std::io;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::{Message, Opcode};

/// Maximum payload bytes per `create_file` message
pub const CHUNK_SIZE: usize = 1024;

/// Splits an in-memory buffer into the message sequence for `path`
pub fn chunk_messages(path: &str, data: &[u8]) -> Vec<Message> {
	let mut msgs: Vec<Message> = data
		.chunks(CHUNK_SIZE)
		.map(|chunk| Message::with_data(Opcode::CreateFile, path, chunk.to_vec()))
		.collect();
	msgs.push(Message::eop(path));
	msgs
}

/// Fills `buf` from `reader` until it is full or the reader is exhausted
///
/// Returns the number of bytes read; only the last chunk of a file is short.
pub async fn read_chunk<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
	R: AsyncRead + Unpin,
{
	let mut filled = 0;
	while filled < buf.len() {
		let n = reader.read(&mut buf[filled..]).await?;
		if n == 0 {
			break;
		}
		filled += n;
	}
	Ok(filled)
}

/// Reassembles the payloads of a chunk sequence, stopping at `eop`
pub fn reassemble(msgs: &[Message]) -> Vec<u8> {
	msgs.iter()
		.take_while(|m| m.opcode != Opcode::Eop)
		.flat_map(|m| m.payload().iter().copied())
		.collect()
}


// vim: ts=4
