//! Push wire protocol: discovery probes and the offer/verdict exchange of one transfer.

use serde::{Deserialize, Serialize};

/// Current protocol version. Carried by inquiries and beacons.
pub const PROTOCOL_VERSION: u8 = 1;

/// All wire message types. Encoding is bincode; framing is length-prefix (see wire module).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    /// Discovery: ask nearby receivers to announce themselves.
    Inquiry { protocol_version: u8 },
    /// Discovery answer: a receiver and the TCP port it accepts pushes on.
    Beacon {
        protocol_version: u8,
        device_id: String,
        name: String,
        device_class: u32,
        push_port: u16,
    },
    /// Sender proposes a file. The payload follows only after an accepting verdict.
    Offer { file_name: String, length: u64 },
    /// Receiver's decision on an offer.
    Verdict { accept: bool },
    /// Receiver confirms the payload was stored.
    Complete { ok: bool },
}
