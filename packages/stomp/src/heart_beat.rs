use std::{str::FromStr, time::Duration};

use crate::StompError;

/// The `heart-beat` header: how often a peer can send, and wants to receive,
/// heart-beats. Zero means "not at all".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HeartBeat {
    pub outgoing: Duration,
    pub incoming: Duration,
}

/// Heart-beat intervals both peers agreed on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NegotiatedHeartBeat {
    /// How often this side must send something.
    pub send_every: Option<Duration>,
    /// How often the other side promised to send something.
    pub expect_every: Option<Duration>,
}

impl HeartBeat {
    pub const NONE: Self = Self {
        outgoing: Duration::ZERO,
        incoming: Duration::ZERO,
    };

    #[must_use]
    pub const fn symmetric(interval: Duration) -> Self {
        Self {
            outgoing: interval,
            incoming: interval,
        }
    }

    /// Negotiates intervals from the client's (`self`) and server's headers.
    #[must_use]
    pub fn negotiate(self, server: Self) -> NegotiatedHeartBeat {
        let agree = |ours: Duration, theirs: Duration| {
            (!ours.is_zero() && !theirs.is_zero()).then(|| ours.max(theirs))
        };

        NegotiatedHeartBeat {
            send_every: agree(self.outgoing, server.incoming),
            expect_every: agree(self.incoming, server.outgoing),
        }
    }
}

impl std::fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{},{}",
            self.outgoing.as_millis(),
            self.incoming.as_millis()
        )
    }
}

impl FromStr for HeartBeat {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StompError::InvalidHeartBeat(s.to_string());
        let (outgoing, incoming) = s.split_once(',').ok_or_else(invalid)?;
        let outgoing = outgoing.trim().parse::<u64>().map_err(|_| invalid())?;
        let incoming = incoming.trim().parse::<u64>().map_err(|_| invalid())?;

        Ok(Self {
            outgoing: Duration::from_millis(outgoing),
            incoming: Duration::from_millis(incoming),
        })
    }
}
