//! Subscribe stream cursor.

use serde::{Deserialize, Serialize};

/// Opaque resume position in the event stream.
///
/// The service assigns a monotonically increasing timetoken per region;
/// the loop echoes the last received cursor on each poll so delivery
/// resumes after the last dispatched event. A zero timetoken means
/// "start from now".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeCursor {
    /// Server-assigned position in the stream.
    pub timetoken: u64,
    /// Region the timetoken belongs to.
    pub region: u32,
}

impl SubscribeCursor {
    /// Cursor meaning "start from now".
    #[must_use]
    pub const fn start() -> Self {
        Self {
            timetoken: 0,
            region: 0,
        }
    }

    /// Whether this is the "start from now" cursor.
    #[must_use]
    pub const fn is_start(&self) -> bool {
        self.timetoken == 0
    }

    /// Advances to `next` if it is ahead of the current position.
    ///
    /// The cursor never rolls back: a response carrying an older
    /// timetoken leaves the position unchanged.
    pub fn advance(&mut self, next: Self) {
        if next.timetoken > self.timetoken {
            *self = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_cursor() {
        let c = SubscribeCursor::start();
        assert!(c.is_start());
        assert_eq!(c.timetoken, 0);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut c = SubscribeCursor::start();
        c.advance(SubscribeCursor {
            timetoken: 100,
            region: 4,
        });
        assert_eq!(c.timetoken, 100);
        assert_eq!(c.region, 4);

        // Older cursor never rolls the position back.
        c.advance(SubscribeCursor {
            timetoken: 50,
            region: 9,
        });
        assert_eq!(c.timetoken, 100);
        assert_eq!(c.region, 4);

        c.advance(SubscribeCursor {
            timetoken: 101,
            region: 4,
        });
        assert_eq!(c.timetoken, 101);
    }

    #[test]
    fn test_equal_timetoken_keeps_region() {
        let mut c = SubscribeCursor {
            timetoken: 10,
            region: 1,
        };
        c.advance(SubscribeCursor {
            timetoken: 10,
            region: 2,
        });
        assert_eq!(c.region, 1);
    }
}
