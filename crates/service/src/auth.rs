use std::{net::SocketAddrV4, sync::Arc};

use codec::{
    SIGNED_LEN,
    crypto::hmac_sha1_verify,
    message::{CreateRoomRequest, ErrorCode},
};

use crate::{ServiceHandler, token::TokenRotator};

/// Admission checks for CreateRoomRequest.
///
/// Runs four checks in order, failing fast:
///
/// 1. the presented token is inside the rotator's acceptance window,
/// 2. the claimed ip/port in the frame matches the UDP source address
///    (a captured frame replayed from another address fails here),
/// 3. the username resolves to a shared secret,
/// 4. the integrity field equals HMAC-SHA1(secret, frame[0..236]),
///    compared in constant time.
///
/// The frame's time field is carried but not validated; replay
/// containment comes from the ≤2-period token window combined with the
/// address binding. Unknown users and integrity mismatches report the
/// same code so usernames cannot be enumerated.
pub struct Authenticator<T> {
    tokens: Arc<TokenRotator>,
    handler: T,
}

impl<T> Authenticator<T>
where
    T: ServiceHandler,
{
    pub fn new(tokens: Arc<TokenRotator>, handler: T) -> Self {
        Self { tokens, handler }
    }

    pub fn verify(
        &self,
        source: SocketAddrV4,
        request: &CreateRoomRequest<'_>,
        bytes: &[u8],
    ) -> ErrorCode {
        if !self.tokens.accepts(request.token) {
            return ErrorCode::AuthFailed;
        }

        if request.ip != u32::from_le_bytes(source.ip().octets())
            || request.port != u32::from(source.port())
        {
            return ErrorCode::AddressInvalid;
        }

        let Some(secret) = self.handler.get_secret(request.username) else {
            return ErrorCode::AuthFailed;
        };

        if hmac_sha1_verify(secret.as_bytes(), &[&bytes[..SIGNED_LEN]], request.integrity) {
            ErrorCode::Ok
        } else {
            ErrorCode::AuthFailed
        }
    }
}
