use crate::error::ErrorKind;
use crate::events::MutationEvent;
use crate::marker::{Marker, OwnerId};
use anyhow::anyhow;
use anyhow::Error;
use anyhow::Result;
use byteorder::BigEndian;
use byteorder::WriteBytesExt;
use std::io::{self, Cursor};
use tokio::net::TcpStream;

use byteorder::ReadBytesExt;

pub const VERSION: u8 = 1;

type Version = u8;
type PlayerHash = u64;

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Status {
    OK,
    ERR,
    VersionMismatch,
    Invalid,
    Occupied,
    Restricted,
    NotFound,
    Unavailable,
    Unregistered,
}

impl From<ErrorKind> for Status {
    fn from(kind: ErrorKind) -> Status {
        match kind {
            ErrorKind::Validation => Status::Invalid,
            ErrorKind::Occupied => Status::Occupied,
            ErrorKind::Restricted => Status::Restricted,
            ErrorKind::NotFound => Status::NotFound,
            ErrorKind::Unavailable => Status::Unavailable,
        }
    }
}

#[repr(u8)]
pub enum CommandMap {
    Response,
    Handshake,
    PlaceMarker,
    TouchMarker,
    RemoveMarker,
    ClearMarkers,
    FetchTile,
    QueryRestricted,
    Disconnect,
    Handshaken,
    TileData,
    RestrictedCells,
    MarkerEvent,
    MarkersCleared,
}

impl TryFrom<u8> for CommandMap {
    type Error = Error;

    fn try_from(num: u8) -> Result<CommandMap> {
        match num {
            0 => Ok(CommandMap::Response),
            1 => Ok(CommandMap::Handshake),
            2 => Ok(CommandMap::PlaceMarker),
            3 => Ok(CommandMap::TouchMarker),
            4 => Ok(CommandMap::RemoveMarker),
            5 => Ok(CommandMap::ClearMarkers),
            6 => Ok(CommandMap::FetchTile),
            7 => Ok(CommandMap::QueryRestricted),
            8 => Ok(CommandMap::Disconnect),
            9 => Ok(CommandMap::Handshaken),
            10 => Ok(CommandMap::TileData),
            11 => Ok(CommandMap::RestrictedCells),
            12 => Ok(CommandMap::MarkerEvent),
            13 => Ok(CommandMap::MarkersCleared),
            _ => Err(anyhow!("Unsupported command code '{}'", num)),
        }
    }
}

#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Updated,
    Deleted,
}

/// Everything sent with a tile fetch response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileFrame {
    pub tile_x: i32,
    pub tile_y: i32,
    pub format_version: u8,
    pub last_updated_ms: i64,
    pub max_age_secs: u16,
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
    /// Versioned container, as produced by the tile codec.
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Response(Status),
    Handshake(Version, PlayerHash),
    PlaceMarker(i32, i32),
    TouchMarker(i32, i32),
    RemoveMarker(i32, i32),
    ClearMarkers,
    FetchTile(i32, i32),
    QueryRestricted {
        x: i32,
        y: i32,
        direction: u8,
        indices: Vec<u32>,
    },
    Disconnect,
    Handshaken(Status, OwnerId),
    TileData(TileFrame),
    RestrictedCells(Vec<u32>),
    MarkerEvent(EventKind, Marker),
    MarkersCleared(OwnerId, u32),
}

impl Command {
    /// Push notifications for a mutation.
    pub fn from_event(event: &MutationEvent) -> Vec<Command> {
        match event {
            MutationEvent::Created(marker) => {
                vec![Command::MarkerEvent(EventKind::Created, *marker)]
            }
            MutationEvent::Updated(marker) => {
                vec![Command::MarkerEvent(EventKind::Updated, *marker)]
            }
            MutationEvent::Deleted(marker) => {
                vec![Command::MarkerEvent(EventKind::Deleted, *marker)]
            }
            MutationEvent::BulkDeleted { owner, markers } => {
                vec![Command::MarkersCleared(*owner, markers.len() as u32)]
            }
        }
    }

    /// Encodes a server-bound frame into `buf`, returning its length.
    pub fn into_bytes(&self, buf: &mut Vec<u8>) -> io::Result<usize> {
        buf.clear();
        let mut buf = Cursor::new(buf);
        match self {
            Command::Response(status) => {
                buf.write_u8(CommandMap::Response as u8)?;
                buf.write_u8(*status as u8)?;
            }
            Command::Handshaken(status, id) => {
                buf.write_u8(CommandMap::Handshaken as u8)?;
                buf.write_u8(*status as u8)?;
                buf.write_u16::<BigEndian>(*id)?;
            }
            Command::TileData(frame) => {
                buf.write_u8(CommandMap::TileData as u8)?;
                buf.write_i32::<BigEndian>(frame.tile_x)?;
                buf.write_i32::<BigEndian>(frame.tile_y)?;
                buf.write_u8(frame.format_version)?;
                buf.write_i64::<BigEndian>(frame.last_updated_ms)?;
                buf.write_u16::<BigEndian>(frame.max_age_secs)?;
                buf.write_i32::<BigEndian>(frame.min_x)?;
                buf.write_i32::<BigEndian>(frame.min_y)?;
                buf.write_i32::<BigEndian>(frame.max_x)?;
                buf.write_i32::<BigEndian>(frame.max_y)?;
                buf.write_u32::<BigEndian>(frame.bytes.len() as u32)?;
                io::Write::write_all(&mut buf, &frame.bytes)?;
            }
            Command::RestrictedCells(indices) => {
                buf.write_u8(CommandMap::RestrictedCells as u8)?;
                buf.write_u32::<BigEndian>(indices.len() as u32)?;
                for index in indices {
                    buf.write_u32::<BigEndian>(*index)?;
                }
            }
            Command::MarkerEvent(kind, marker) => {
                buf.write_u8(CommandMap::MarkerEvent as u8)?;
                buf.write_u8(*kind as u8)?;
                buf.write_u64::<BigEndian>(marker.id)?;
                buf.write_i32::<BigEndian>(marker.x)?;
                buf.write_i32::<BigEndian>(marker.y)?;
                buf.write_u16::<BigEndian>(marker.owner)?;
                buf.write_i64::<BigEndian>(marker.updated_at)?;
            }
            Command::MarkersCleared(owner, count) => {
                buf.write_u8(CommandMap::MarkersCleared as u8)?;
                buf.write_u16::<BigEndian>(*owner)?;
                buf.write_u32::<BigEndian>(*count)?;
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "client commands are never sent by the server",
                ))
            }
        }
        Ok(buf.position() as usize)
    }

    pub async fn send(&self, buf: &mut Vec<u8>, socket: &mut TcpStream) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        let n = self.into_bytes(buf)?;
        socket.write_all(&buf[0..n]).await?;
        Ok(())
    }

    /// Parses one client frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when `buf` holds only part of a frame.
    pub fn parse(buf: &[u8]) -> Result<Option<(Command, usize)>> {
        let mut cursor = Cursor::new(buf);
        match Command::try_from(&mut cursor) {
            Ok(command) => Ok(Some((command, cursor.position() as usize))),
            Err(e) => match e.downcast_ref::<io::Error>() {
                Some(io_err) if io_err.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
                _ => Err(e),
            },
        }
    }
}

impl TryFrom<&mut Cursor<&[u8]>> for Command {
    type Error = Error;

    fn try_from(buf: &mut Cursor<&[u8]>) -> Result<Command> {
        let map: CommandMap = buf.read_u8()?.try_into()?;

        match map {
            CommandMap::Handshake => Ok(Command::Handshake(
                buf.read_u8()?,
                buf.read_u64::<BigEndian>()?,
            )),
            CommandMap::PlaceMarker => Ok(Command::PlaceMarker(
                buf.read_i32::<BigEndian>()?,
                buf.read_i32::<BigEndian>()?,
            )),
            CommandMap::TouchMarker => Ok(Command::TouchMarker(
                buf.read_i32::<BigEndian>()?,
                buf.read_i32::<BigEndian>()?,
            )),
            CommandMap::RemoveMarker => Ok(Command::RemoveMarker(
                buf.read_i32::<BigEndian>()?,
                buf.read_i32::<BigEndian>()?,
            )),
            CommandMap::ClearMarkers => Ok(Command::ClearMarkers),
            CommandMap::FetchTile => Ok(Command::FetchTile(
                buf.read_i32::<BigEndian>()?,
                buf.read_i32::<BigEndian>()?,
            )),
            CommandMap::QueryRestricted => {
                let x = buf.read_i32::<BigEndian>()?;
                let y = buf.read_i32::<BigEndian>()?;
                let direction = buf.read_u8()?;
                let count = buf.read_u16::<BigEndian>()? as usize;
                let mut indices = Vec::with_capacity(count);
                for _ in 0..count {
                    indices.push(buf.read_u32::<BigEndian>()?);
                }
                Ok(Command::QueryRestricted {
                    x,
                    y,
                    direction,
                    indices,
                })
            }
            CommandMap::Disconnect => Ok(Command::Disconnect),
            _ => Err(anyhow!("Server code sent from client!")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(code: CommandMap, write: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
        let mut buf = vec![code as u8];
        write(&mut buf);
        buf
    }

    fn cell_frame(code: CommandMap, x: i32, y: i32) -> Vec<u8> {
        frame(code, |buf| {
            buf.write_i32::<BigEndian>(x).unwrap();
            buf.write_i32::<BigEndian>(y).unwrap();
        })
    }

    fn parse_all(raw: &[u8]) -> Command {
        let (parsed, used) = Command::parse(raw).unwrap().unwrap();
        assert_eq!(used, raw.len());
        parsed
    }

    #[test]
    fn test_client_frames_parse() {
        let handshake = frame(CommandMap::Handshake, |buf| {
            buf.write_u8(VERSION).unwrap();
            buf.write_u64::<BigEndian>(0xdead_beef_0000_0001).unwrap();
        });
        assert_eq!(parse_all(&handshake), Command::Handshake(VERSION, 0xdead_beef_0000_0001));
        assert_eq!(
            parse_all(&cell_frame(CommandMap::PlaceMarker, -1000, 999)),
            Command::PlaceMarker(-1000, 999)
        );
        assert_eq!(
            parse_all(&cell_frame(CommandMap::RemoveMarker, 3, -4)),
            Command::RemoveMarker(3, -4)
        );
        assert_eq!(parse_all(&[CommandMap::ClearMarkers as u8]), Command::ClearMarkers);
        assert_eq!(parse_all(&[CommandMap::Disconnect as u8]), Command::Disconnect);

        let query = frame(CommandMap::QueryRestricted, |buf| {
            buf.write_i32::<BigEndian>(5).unwrap();
            buf.write_i32::<BigEndian>(-5).unwrap();
            buf.write_u8(2).unwrap();
            buf.write_u16::<BigEndian>(3).unwrap();
            for index in [0u32, 17, 1088] {
                buf.write_u32::<BigEndian>(index).unwrap();
            }
        });
        assert_eq!(
            parse_all(&query),
            Command::QueryRestricted {
                x: 5,
                y: -5,
                direction: 2,
                indices: vec![0, 17, 1088],
            }
        );
    }

    #[test]
    fn test_partial_frame_waits_for_more() {
        let raw = cell_frame(CommandMap::PlaceMarker, 1, 2);
        assert_eq!(raw.len(), 9);
        assert!(Command::parse(&raw[..5]).unwrap().is_none());
        assert!(Command::parse(&[]).unwrap().is_none());
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut stream = cell_frame(CommandMap::FetchTile, 0, 0);
        stream.extend(cell_frame(CommandMap::TouchMarker, 7, 7));
        let (first, used) = Command::parse(&stream).unwrap().unwrap();
        assert_eq!(first, Command::FetchTile(0, 0));
        let (second, _) = Command::parse(&stream[used..]).unwrap().unwrap();
        assert_eq!(second, Command::TouchMarker(7, 7));
    }

    #[test]
    fn test_client_commands_are_not_encoded() {
        let mut buf = Vec::new();
        assert!(Command::PlaceMarker(1, 1).into_bytes(&mut buf).is_err());
        let n = Command::Response(Status::Restricted).into_bytes(&mut buf).unwrap();
        assert_eq!(&buf[..n], &[CommandMap::Response as u8, Status::Restricted as u8]);
    }

    #[test]
    fn test_rejects_server_and_unknown_codes() {
        assert!(Command::parse(&[CommandMap::Handshaken as u8, 0, 0, 1]).is_err());
        assert!(Command::parse(&[200]).is_err());
    }

    #[test]
    fn test_tile_data_layout() {
        let frame = TileFrame {
            tile_x: 3,
            tile_y: -1,
            format_version: 1,
            last_updated_ms: 42,
            max_age_secs: 10,
            min_x: 192,
            min_y: -64,
            max_x: 255,
            max_y: -1,
            bytes: vec![1, 0xaa, 0xbb],
        };
        let mut buf = Vec::new();
        let n = Command::TileData(frame).into_bytes(&mut buf).unwrap();
        assert_eq!(n, 1 + 4 + 4 + 1 + 8 + 2 + 16 + 4 + 3);
        assert_eq!(buf[0], CommandMap::TileData as u8);
        assert_eq!(&buf[1..5], &3i32.to_be_bytes());
        assert_eq!(buf[9], 1);
        assert_eq!(&buf[n - 3..n], &[1, 0xaa, 0xbb]);
    }

    #[test]
    fn test_event_frames() {
        let marker = Marker {
            id: 77,
            owner: 3,
            x: -9,
            y: 12,
            created_at: 1,
            updated_at: 2,
        };
        let commands = Command::from_event(&MutationEvent::Deleted(marker));
        assert_eq!(commands, vec![Command::MarkerEvent(EventKind::Deleted, marker)]);

        let mut buf = Vec::new();
        let n = commands[0].into_bytes(&mut buf).unwrap();
        assert_eq!(n, 1 + 1 + 8 + 4 + 4 + 2 + 8);
        assert_eq!(buf[1], EventKind::Deleted as u8);

        let cleared = Command::from_event(&MutationEvent::BulkDeleted {
            owner: 3,
            markers: vec![marker, marker],
        });
        assert_eq!(cleared, vec![Command::MarkersCleared(3, 2)]);
    }

    #[test]
    fn test_status_from_error_kind() {
        assert_eq!(Status::from(ErrorKind::Restricted), Status::Restricted);
        assert_eq!(Status::from(ErrorKind::Validation), Status::Invalid);
    }
}
