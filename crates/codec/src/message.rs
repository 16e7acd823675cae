use std::net::SocketAddrV4;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::{Error, FRAME_SIZE, MAGIC, SIGNED_LEN, VERSION, crypto::hmac_sha1};

const MAGIC_OFFSET: usize = 0;
const VERSION_OFFSET: usize = 4;
const TYPE_OFFSET: usize = 8;
const ERRCODE_OFFSET: usize = 12;
const TIME_OFFSET: usize = 16;
const IP_OFFSET: usize = 24;
const PORT_OFFSET: usize = 28;
const TOKEN_OFFSET: usize = 32;
const ID_OFFSET: usize = 48;
const USERNAME_OFFSET: usize = 64;
const ROOM_OFFSET: usize = 80;
const INTEGRITY_OFFSET: usize = SIGNED_LEN;

/// The six control message types carried in the frame type field.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum MessageType {
    CreateRoomRequest = 0x123001,
    CreateRoomResponse = 0x123002,
    JoinRoomRequest = 0x123003,
    JoinRoomResponse = 0x123004,
    ReflexRequest = 0x124001,
    ReflexResponse = 0x124002,
}

/// Result of a request, carried in the errcode field of responses.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum ErrorCode {
    Ok = 0,
    AuthFailed = 1,
    AddressInvalid = 2,
    TimeInvalid = 3,
}

/// Classifies a datagram as one of the known control messages.
///
/// Anything that is not exactly [`FRAME_SIZE`] bytes, or that fails the
/// magic/version/type gates, returns `None` and should be handled as an
/// opaque relay payload.
///
/// # Test
///
/// ```
/// use relay_server_codec::message::{MessageType, classify, encode_reflex_request};
///
/// let frame = encode_reflex_request();
///
/// assert_eq!(classify(&frame), Some(MessageType::ReflexRequest));
/// assert_eq!(classify(&frame[..64]), None);
/// assert_eq!(classify(&[0u8; 256]), None);
/// ```
pub fn classify(bytes: &[u8]) -> Option<MessageType> {
    if bytes.len() != FRAME_SIZE {
        return None;
    }

    if u32_at(bytes, MAGIC_OFFSET)? != MAGIC {
        return None;
    }

    if u32_at(bytes, VERSION_OFFSET)? != VERSION {
        return None;
    }

    MessageType::try_from(u32_at(bytes, TYPE_OFFSET)?).ok()
}

/// A decoded CreateRoomRequest, borrowing the underlying frame.
///
/// `ip` is the client-claimed source address: the IPv4 octets in source
/// order read as a little-endian u32.
///
/// # Test
///
/// ```
/// use std::net::SocketAddrV4;
///
/// use relay_server_codec::message::{CreateRoomRequest, encode_create_request, sign};
///
/// let source: SocketAddrV4 = "203.0.113.7:40000".parse().unwrap();
/// let mut frame =
///     encode_create_request(b"0123456789ABCDEF", "user1", &[7u8; 16], source, 1700000000)
///         .unwrap();
///
/// sign(&mut frame, b"password1").unwrap();
///
/// let request = CreateRoomRequest::decode(&frame).unwrap();
///
/// assert_eq!(request.username, "user1");
/// assert_eq!(request.ip, u32::from_le_bytes([203, 0, 113, 7]));
/// assert_eq!(request.port, 40000);
/// assert_eq!(request.token, &[7u8; 16]);
/// assert_eq!(request.id, b"0123456789ABCDEF");
/// ```
#[derive(Debug)]
pub struct CreateRoomRequest<'a> {
    pub time: i64,
    pub ip: u32,
    pub port: u32,
    pub token: &'a [u8; 16],
    pub id: &'a [u8; 16],
    pub username: &'a str,
    pub integrity: &'a [u8; 20],
}

impl<'a> CreateRoomRequest<'a> {
    pub fn decode(bytes: &'a [u8]) -> Option<Self> {
        if classify(bytes)? != MessageType::CreateRoomRequest {
            return None;
        }

        Some(Self {
            time: i64_at(bytes, TIME_OFFSET)?,
            ip: u32_at(bytes, IP_OFFSET)?,
            port: u32_at(bytes, PORT_OFFSET)?,
            token: fixed(bytes, TOKEN_OFFSET)?,
            id: fixed(bytes, ID_OFFSET)?,
            username: username_at(bytes)?,
            integrity: fixed(bytes, INTEGRITY_OFFSET)?,
        })
    }
}

/// A decoded JoinRoomRequest, borrowing the underlying frame.
#[derive(Debug)]
pub struct JoinRoomRequest<'a> {
    pub id: &'a [u8; 16],
    pub username: &'a str,
    pub room: &'a [u8; 16],
}

impl<'a> JoinRoomRequest<'a> {
    pub fn decode(bytes: &'a [u8]) -> Option<Self> {
        if classify(bytes)? != MessageType::JoinRoomRequest {
            return None;
        }

        Some(Self {
            id: fixed(bytes, ID_OFFSET)?,
            username: username_at(bytes)?,
            room: fixed(bytes, ROOM_OFFSET)?,
        })
    }
}

/// A decoded CreateRoomResponse.
#[derive(Debug)]
pub struct CreateRoomResponse<'a> {
    pub id: &'a [u8; 16],
    pub code: ErrorCode,
    pub room: &'a [u8; 16],
}

impl<'a> CreateRoomResponse<'a> {
    pub fn decode(bytes: &'a [u8]) -> Option<Self> {
        if classify(bytes)? != MessageType::CreateRoomResponse {
            return None;
        }

        Some(Self {
            id: fixed(bytes, ID_OFFSET)?,
            code: ErrorCode::try_from(i32_at(bytes, ERRCODE_OFFSET)?).ok()?,
            room: fixed(bytes, ROOM_OFFSET)?,
        })
    }
}

/// A decoded JoinRoomResponse.
#[derive(Debug)]
pub struct JoinRoomResponse<'a> {
    pub id: &'a [u8; 16],
    pub code: ErrorCode,
    pub room: &'a [u8; 16],
}

impl<'a> JoinRoomResponse<'a> {
    pub fn decode(bytes: &'a [u8]) -> Option<Self> {
        if classify(bytes)? != MessageType::JoinRoomResponse {
            return None;
        }

        Some(Self {
            id: fixed(bytes, ID_OFFSET)?,
            code: ErrorCode::try_from(i32_at(bytes, ERRCODE_OFFSET)?).ok()?,
            room: fixed(bytes, ROOM_OFFSET)?,
        })
    }
}

/// A decoded ReflexResponse: the sender's externally observed address
/// and the token currently issued by the server.
///
/// # Test
///
/// ```
/// use std::net::SocketAddrV4;
///
/// use relay_server_codec::message::{ReflexResponse, encode_reflex_response};
///
/// let observed: SocketAddrV4 = "203.0.113.7:40000".parse().unwrap();
/// let frame = encode_reflex_response(observed, &[9u8; 16]);
///
/// let response = ReflexResponse::decode(&frame).unwrap();
///
/// assert_eq!(response.ip.to_le_bytes(), observed.ip().octets());
/// assert_eq!(response.port, 40000);
/// assert_eq!(response.token, &[9u8; 16]);
/// ```
#[derive(Debug)]
pub struct ReflexResponse<'a> {
    pub ip: u32,
    pub port: u32,
    pub token: &'a [u8; 16],
}

impl<'a> ReflexResponse<'a> {
    pub fn decode(bytes: &'a [u8]) -> Option<Self> {
        if classify(bytes)? != MessageType::ReflexResponse {
            return None;
        }

        Some(Self {
            ip: u32_at(bytes, IP_OFFSET)?,
            port: u32_at(bytes, PORT_OFFSET)?,
            token: fixed(bytes, TOKEN_OFFSET)?,
        })
    }
}

/// Encodes a CreateRoomResponse. Responses are not signed; the
/// integrity field stays zeroed.
pub fn encode_create_response(id: &[u8; 16], code: ErrorCode, room: &[u8; 16]) -> [u8; FRAME_SIZE] {
    let mut frame = header(MessageType::CreateRoomResponse);
    frame[ERRCODE_OFFSET..][..4].copy_from_slice(&i32::from(code).to_le_bytes());
    frame[ID_OFFSET..][..16].copy_from_slice(id);
    frame[ROOM_OFFSET..][..16].copy_from_slice(room);
    frame
}

/// Encodes a JoinRoomResponse. Responses are not signed.
pub fn encode_join_response(id: &[u8; 16], code: ErrorCode, room: &[u8; 16]) -> [u8; FRAME_SIZE] {
    let mut frame = header(MessageType::JoinRoomResponse);
    frame[ERRCODE_OFFSET..][..4].copy_from_slice(&i32::from(code).to_le_bytes());
    frame[ID_OFFSET..][..16].copy_from_slice(id);
    frame[ROOM_OFFSET..][..16].copy_from_slice(room);
    frame
}

/// Encodes a ReflexResponse carrying the observed source address and
/// the currently issued token.
pub fn encode_reflex_response(observed: SocketAddrV4, token: &[u8; 16]) -> [u8; FRAME_SIZE] {
    let mut frame = header(MessageType::ReflexResponse);
    // Octets in source order are exactly the LE encoding of the ip field.
    frame[IP_OFFSET..][..4].copy_from_slice(&observed.ip().octets());
    frame[PORT_OFFSET..][..4].copy_from_slice(&u32::from(observed.port()).to_le_bytes());
    frame[TOKEN_OFFSET..][..16].copy_from_slice(token);
    frame
}

/// Encodes an unsigned CreateRoomRequest. Call [`sign`] before sending.
///
/// Fails if the username is empty or longer than the 16-byte field.
pub fn encode_create_request(
    id: &[u8; 16],
    username: &str,
    token: &[u8; 16],
    source: SocketAddrV4,
    time: i64,
) -> Result<[u8; FRAME_SIZE], Error> {
    let mut frame = header(MessageType::CreateRoomRequest);
    frame[TIME_OFFSET..][..8].copy_from_slice(&time.to_le_bytes());
    frame[IP_OFFSET..][..4].copy_from_slice(&source.ip().octets());
    frame[PORT_OFFSET..][..4].copy_from_slice(&u32::from(source.port()).to_le_bytes());
    frame[TOKEN_OFFSET..][..16].copy_from_slice(token);
    frame[ID_OFFSET..][..16].copy_from_slice(id);
    put_username(&mut frame, username)?;
    Ok(frame)
}

/// Encodes a JoinRoomRequest. Join requests are admitted by room id
/// possession and carry no integrity signature.
pub fn encode_join_request(
    id: &[u8; 16],
    username: &str,
    room: &[u8; 16],
) -> Result<[u8; FRAME_SIZE], Error> {
    let mut frame = header(MessageType::JoinRoomRequest);
    frame[ID_OFFSET..][..16].copy_from_slice(id);
    frame[ROOM_OFFSET..][..16].copy_from_slice(room);
    put_username(&mut frame, username)?;
    Ok(frame)
}

/// Encodes a ReflexRequest. The probe carries no fields beyond the
/// frame header.
pub fn encode_reflex_request() -> [u8; FRAME_SIZE] {
    header(MessageType::ReflexRequest)
}

/// Computes the integrity field over the signed prefix and writes it
/// into the frame.
///
/// # Test
///
/// ```
/// use relay_server_codec::SIGNED_LEN;
/// use relay_server_codec::crypto::hmac_sha1_verify;
/// use relay_server_codec::message::{encode_reflex_request, sign};
///
/// let mut frame = encode_reflex_request();
/// sign(&mut frame, b"secret").unwrap();
///
/// assert!(hmac_sha1_verify(b"secret", &[&frame[..SIGNED_LEN]], &frame[SIGNED_LEN..]));
/// ```
pub fn sign(frame: &mut [u8; FRAME_SIZE], secret: &[u8]) -> Result<(), Error> {
    let tag = hmac_sha1(secret, &[&frame[..SIGNED_LEN]])?.into_bytes();
    frame[SIGNED_LEN..].copy_from_slice(&tag);
    Ok(())
}

fn header(kind: MessageType) -> [u8; FRAME_SIZE] {
    let mut frame = [0u8; FRAME_SIZE];
    frame[MAGIC_OFFSET..][..4].copy_from_slice(&MAGIC.to_le_bytes());
    frame[VERSION_OFFSET..][..4].copy_from_slice(&VERSION.to_le_bytes());
    frame[TYPE_OFFSET..][..4].copy_from_slice(&u32::from(kind).to_le_bytes());
    frame
}

fn put_username(frame: &mut [u8; FRAME_SIZE], username: &str) -> Result<(), Error> {
    if username.is_empty() || username.len() > 16 {
        return Err(Error::InvalidInput);
    }

    frame[USERNAME_OFFSET..][..username.len()].copy_from_slice(username.as_bytes());
    Ok(())
}

fn fixed<const N: usize>(bytes: &[u8], start: usize) -> Option<&[u8; N]> {
    bytes.get(start..start + N)?.try_into().ok()
}

fn u32_at(bytes: &[u8], start: usize) -> Option<u32> {
    Some(u32::from_le_bytes(*fixed(bytes, start)?))
}

fn i32_at(bytes: &[u8], start: usize) -> Option<i32> {
    Some(i32::from_le_bytes(*fixed(bytes, start)?))
}

fn i64_at(bytes: &[u8], start: usize) -> Option<i64> {
    Some(i64::from_le_bytes(*fixed(bytes, start)?))
}

/// The username field is NUL padded; trim at the first zero byte.
/// Non-UTF-8 content makes the whole frame undecodable.
fn username_at(bytes: &[u8]) -> Option<&str> {
    let raw: &[u8; 16] = fixed(bytes, USERNAME_OFFSET)?;
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    std::str::from_utf8(&raw[..end]).ok()
}
