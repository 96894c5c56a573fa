//! Wire framing
//!
//! A frame is a 4-character, space-padded ASCII decimal byte count followed
//! by a UTF-8 JSON object. The object always carries all four fields
//! (`Opcode`, `Path`, `Hash`, `Data`) so the parser never has to branch on
//! which ones are present; absent values are sent as empty strings.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::ProtocolError;
use super::types::{Message, Opcode};

/// Width of the length prefix in bytes
pub const LENGTH_FIELD_WIDTH: usize = 4;

/// Largest body the length prefix can express
pub const MAX_BODY_LEN: usize = 9999;

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct Frame {
	opcode: i64,
	path: String,
	hash: String,
	data: String,
}

/// Encodes a message into a complete frame (length prefix + JSON body)
pub fn encode(msg: &Message) -> Result<Vec<u8>, ProtocolError> {
	let frame = Frame {
		opcode: msg.opcode.code(),
		path: msg.path.clone(),
		hash: msg.hash.clone(),
		data: match &msg.data {
			Some(data) if msg.opcode != Opcode::Login => BASE64.encode(data),
			_ => String::new(),
		},
	};
	let body = serde_json::to_vec(&frame)?;
	if body.len() > MAX_BODY_LEN {
		return Err(ProtocolError::FrameTooLarge(body.len()));
	}

	let mut out = Vec::with_capacity(LENGTH_FIELD_WIDTH + body.len());
	out.extend_from_slice(format!("{:>width$}", body.len(), width = LENGTH_FIELD_WIDTH).as_bytes());
	out.extend_from_slice(&body);
	Ok(out)
}

/// Parses the fixed-width length prefix
pub fn parse_length(field: &[u8]) -> Result<usize, ProtocolError> {
	let text = std::str::from_utf8(field)
		.map_err(|_| ProtocolError::InvalidLength(String::from_utf8_lossy(field).into_owned()))?;
	text.trim().parse::<usize>().map_err(|_| ProtocolError::InvalidLength(text.to_string()))
}

/// Parses a JSON body into a message
pub fn decode_body(body: &[u8]) -> Result<Message, ProtocolError> {
	let frame: Frame = serde_json::from_slice(body)?;
	let data = if frame.data.is_empty() { None } else { Some(BASE64.decode(frame.data.as_bytes())?) };

	Ok(Message { opcode: Opcode::from_code(frame.opcode), path: frame.path, hash: frame.hash, data }
		.scrub())
}

/// Reads exactly one frame from the stream
pub async fn read_message<R>(reader: &mut R) -> Result<Message, ProtocolError>
where
	R: AsyncRead + Unpin,
{
	let mut field = [0u8; LENGTH_FIELD_WIDTH];
	reader.read_exact(&mut field).await?;
	let len = parse_length(&field)?;

	let mut body = vec![0u8; len];
	reader.read_exact(&mut body).await?;
	decode_body(&body)
}

/// Writes one frame and flushes it
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> Result<(), ProtocolError>
where
	W: AsyncWrite + Unpin,
{
	let frame = encode(msg)?;
	writer.write_all(&frame).await?;
	writer.flush().await?;
	Ok(())
}


// vim: ts=4
