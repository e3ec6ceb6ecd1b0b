//! BluePoint campaign engine.
//! Host-driven: no sockets here. The host supplies discovery and transfer collaborators
//! and a record store; the dispatcher decides who gets which file and keeps the books.

pub mod aggregator;
pub mod cache;
pub mod campaign;
pub mod dispatcher;
pub mod eligibility;
pub mod peer;
pub mod protocol;
pub mod registry;
pub mod store;
pub mod wire;

pub use aggregator::TickReport;
pub use cache::DedupCache;
pub use campaign::{ActivityRecord, Campaign, CampaignError, Outcome, Schedule, ScheduleError, Stats};
pub use dispatcher::{
    Clock, Discovery, DiscoveryError, Dispatcher, DispatcherConfig, Phase, SystemClock, Transfer,
};
pub use eligibility::is_eligible;
pub use peer::{Peer, PeerId};
pub use protocol::{Message, PROTOCOL_VERSION};
pub use registry::CampaignRegistry;
pub use store::{FileRecordStore, MemoryRecordStore, RecordStore, StoreError};
pub use wire::{decode_frame, encode_frame, read_frame, write_frame, FrameDecodeError, FrameEncodeError, FrameIoError};
