//! Peer-wire message framing and the message table from §4.6.
use super::{PeerError, PeerResult};
use crate::config::MAX_FRAME_LEN;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const ID_CHOKE: u8 = 0;
pub const ID_UNCHOKE: u8 = 1;
pub const ID_INTERESTED: u8 = 2;
pub const ID_NOT_INTERESTED: u8 = 3;
pub const ID_HAVE: u8 = 4;
pub const ID_BITFIELD: u8 = 5;
pub const ID_REQUEST: u8 = 6;
pub const ID_PIECE: u8 = 7;
pub const ID_CANCEL: u8 = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have { index: u32 },
    Bitfield { bits: Vec<u8> },
    Request { index: u32, begin: u32, length: u32 },
    Piece { index: u32, begin: u32, block: Vec<u8> },
    Cancel { index: u32, begin: u32, length: u32 },
}

impl Message {
    pub fn id(&self) -> Option<u8> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(ID_CHOKE),
            Message::Unchoke => Some(ID_UNCHOKE),
            Message::Interested => Some(ID_INTERESTED),
            Message::NotInterested => Some(ID_NOT_INTERESTED),
            Message::Have { .. } => Some(ID_HAVE),
            Message::Bitfield { .. } => Some(ID_BITFIELD),
            Message::Request { .. } => Some(ID_REQUEST),
            Message::Piece { .. } => Some(ID_PIECE),
            Message::Cancel { .. } => Some(ID_CANCEL),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Message::KeepAlive => {
                buf.write_u32::<BigEndian>(0).unwrap();
            }
            Message::Choke
            | Message::Unchoke
            | Message::Interested
            | Message::NotInterested => {
                buf.write_u32::<BigEndian>(1).unwrap();
                buf.push(self.id().unwrap());
            }
            Message::Have { index } => {
                buf.write_u32::<BigEndian>(5).unwrap();
                buf.push(ID_HAVE);
                buf.write_u32::<BigEndian>(*index).unwrap();
            }
            Message::Bitfield { bits } => {
                buf.write_u32::<BigEndian>(1 + bits.len() as u32).unwrap();
                buf.push(ID_BITFIELD);
                buf.extend_from_slice(bits);
            }
            Message::Request { index, begin, length } => {
                buf.write_u32::<BigEndian>(13).unwrap();
                buf.push(ID_REQUEST);
                buf.write_u32::<BigEndian>(*index).unwrap();
                buf.write_u32::<BigEndian>(*begin).unwrap();
                buf.write_u32::<BigEndian>(*length).unwrap();
            }
            Message::Piece { index, begin, block } => {
                buf.write_u32::<BigEndian>(9 + block.len() as u32).unwrap();
                buf.push(ID_PIECE);
                buf.write_u32::<BigEndian>(*index).unwrap();
                buf.write_u32::<BigEndian>(*begin).unwrap();
                buf.extend_from_slice(block);
            }
            Message::Cancel { index, begin, length } => {
                buf.write_u32::<BigEndian>(13).unwrap();
                buf.push(ID_CANCEL);
                buf.write_u32::<BigEndian>(*index).unwrap();
                buf.write_u32::<BigEndian>(*begin).unwrap();
                buf.write_u32::<BigEndian>(*length).unwrap();
            }
        }
        buf
    }

    fn from_payload(id: u8, payload: Vec<u8>) -> PeerResult<Message> {
        match id {
            ID_CHOKE => Ok(Message::Choke),
            ID_UNCHOKE => Ok(Message::Unchoke),
            ID_INTERESTED => Ok(Message::Interested),
            ID_NOT_INTERESTED => Ok(Message::NotInterested),
            ID_HAVE => {
                let mut cursor = std::io::Cursor::new(&payload);
                let index = cursor
                    .read_u32::<BigEndian>()
                    .map_err(|_| PeerError::MalformedMessage("have payload too short"))?;
                Ok(Message::Have { index })
            }
            ID_BITFIELD => Ok(Message::Bitfield { bits: payload }),
            ID_REQUEST | ID_CANCEL => {
                if payload.len() < 12 {
                    return Err(PeerError::MalformedMessage(
                        "request/cancel payload too short",
                    ));
                }
                let mut cursor = std::io::Cursor::new(&payload);
                let index = cursor.read_u32::<BigEndian>().unwrap();
                let begin = cursor.read_u32::<BigEndian>().unwrap();
                let length = cursor.read_u32::<BigEndian>().unwrap();
                if id == ID_REQUEST {
                    Ok(Message::Request { index, begin, length })
                } else {
                    Ok(Message::Cancel { index, begin, length })
                }
            }
            ID_PIECE => {
                if payload.len() < 8 {
                    return Err(PeerError::MalformedMessage("piece payload too short"));
                }
                let mut cursor = std::io::Cursor::new(&payload);
                let index = cursor.read_u32::<BigEndian>().unwrap();
                let begin = cursor.read_u32::<BigEndian>().unwrap();
                let block = payload[8..].to_vec();
                Ok(Message::Piece { index, begin, block })
            }
            other => Err(PeerError::UnknownMessageId(other)),
        }
    }
}

/// Reads one frame: a 4-byte big-endian length prefix followed by that
/// many bytes. Loops internally on short reads (`AsyncReadExt::read_exact`
/// already does this). A length of 0 decodes as `Message::KeepAlive`.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_len: u32,
) -> PeerResult<Message> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf);

    if len == 0 {
        return Ok(Message::KeepAlive);
    }
    if len > max_frame_len {
        return Err(PeerError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len as usize];
    reader.read_exact(&mut payload).await?;
    let id = payload[0];
    Message::from_payload(id, payload[1..].to_vec())
}

pub async fn read_message_default<R: AsyncRead + Unpin>(reader: &mut R) -> PeerResult<Message> {
    read_message(reader, MAX_FRAME_LEN).await
}

pub async fn write_message<W: AsyncWrite + Unpin>(writer: &mut W, message: &Message) -> PeerResult<()> {
    writer.write_all(&message.encode()).await?;
    writer.flush().await?;
    Ok(())
}
