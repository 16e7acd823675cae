use std::{sync::Arc, thread, time::Duration};

use parking_lot::Mutex;
use rand::Rng;

struct Pair {
    current: [u8; 16],
    previous: [u8; 16],
}

/// Issues the 16-byte admission token carried in CreateRoomRequest.
///
/// The pair starts out seeded with the same token. On every rotation
/// the current token becomes the previous one and a fresh random token
/// takes its place, so a token stays acceptable for one rotation
/// period after it stops being issued. That overlap lets a request
/// that was in flight across a rotation boundary still succeed.
///
/// # Test
///
/// ```
/// use relay_server_service::token::TokenRotator;
///
/// let rotator = TokenRotator::new();
/// let token = rotator.issued();
/// assert!(rotator.accepts(&token));
///
/// // Still inside the acceptance window after one rotation.
/// rotator.rotate();
/// assert!(rotator.accepts(&token));
/// assert_ne!(rotator.issued(), token);
///
/// // Two rotations later the token is gone.
/// rotator.rotate();
/// assert!(!rotator.accepts(&token));
/// ```
pub struct TokenRotator(Mutex<Pair>);

impl TokenRotator {
    pub fn new() -> Arc<Self> {
        let token = make_token();

        Arc::new(Self(Mutex::new(Pair {
            current: token,
            previous: token,
        })))
    }

    /// Creates a rotator and spawns the periodic rotation thread.
    ///
    /// The thread holds only a weak reference and exits once the last
    /// owner drops the rotator.
    pub fn run(period: Duration) -> Arc<Self> {
        let this = Self::new();

        let this_ = Arc::downgrade(&this);
        thread::spawn(move || {
            loop {
                thread::sleep(period);

                match this_.upgrade() {
                    Some(this) => this.rotate(),
                    None => break,
                }
            }
        });

        this
    }

    /// The token currently handed out in ReflexResponse.
    pub fn issued(&self) -> [u8; 16] {
        self.0.lock().current
    }

    /// Whether a client-presented token is inside the acceptance
    /// window (current or previous).
    pub fn accepts(&self, token: &[u8; 16]) -> bool {
        let pair = self.0.lock();
        *token == pair.current || *token == pair.previous
    }

    pub fn rotate(&self) {
        let mut pair = self.0.lock();
        pair.previous = pair.current;
        pair.current = make_token();
    }
}

/// Generate a random token.
fn make_token() -> [u8; 16] {
    let mut token = [0u8; 16];
    rand::rng().fill(&mut token);

    token
}
