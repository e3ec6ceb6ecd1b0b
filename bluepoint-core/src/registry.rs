//! Campaign registry: the in-memory campaign set and its crash-safe load/save.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::campaign::Campaign;
use crate::store::{RecordStore, StoreError};

/// On-disk shape of the record store.
#[derive(Debug, Serialize, Deserialize)]
struct RecordFile {
    campaigns: Vec<Campaign>,
}

pub struct CampaignRegistry {
    campaigns: BTreeMap<String, Campaign>,
    store: Box<dyn RecordStore>,
}

impl std::fmt::Debug for CampaignRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CampaignRegistry")
            .field("campaigns", &self.campaigns.keys().collect::<Vec<_>>())
            .field("store", &self.store.describe())
            .finish()
    }
}

impl CampaignRegistry {
    /// Load the campaign set, first repairing a save that was interrupted before promotion.
    /// A missing or corrupt store is an error; there is no implicit default state.
    pub fn load(store: impl RecordStore + 'static) -> Result<Self, StoreError> {
        let store: Box<dyn RecordStore> = Box::new(store);
        recover_staged(store.as_ref())?;
        let bytes = store.read()?;
        let campaigns = decode(&bytes)?;
        info!(
            store = %store.describe(),
            campaigns = campaigns.len(),
            "campaigns loaded"
        );
        Ok(Self { campaigns, store })
    }

    /// Registry over a fresh campaign set. Nothing is written until `save`.
    pub fn from_campaigns(
        store: impl RecordStore + 'static,
        campaigns: impl IntoIterator<Item = Campaign>,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            campaigns: index(campaigns)?,
            store: Box::new(store),
        })
    }

    /// Persist the full set (stats, logs, caches) through a staged write.
    pub fn save(&self) -> Result<(), StoreError> {
        let bytes = encode(&self.campaigns)?;
        self.store.write_staged(&bytes)?;
        self.store.promote_staged()
    }

    pub fn campaigns(&self) -> impl Iterator<Item = &Campaign> {
        self.campaigns.values()
    }

    pub fn campaigns_mut(&mut self) -> impl Iterator<Item = &mut Campaign> {
        self.campaigns.values_mut()
    }

    pub fn get(&self, id: &str) -> Option<&Campaign> {
        self.campaigns.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Campaign> {
        self.campaigns.get_mut(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.campaigns.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }
}

/// What to do with a staged file found at load.
#[derive(Debug)]
enum Staged {
    /// Complete and valid: an interrupted save got as far as writing it.
    Promote,
    /// Does not decode: cut short mid-write.
    Truncated(StoreError),
    /// Decodes but breaks a registry invariant.
    Invalid(StoreError),
}

fn inspect_staged(bytes: &[u8]) -> Staged {
    match decode(bytes) {
        Ok(_) => Staged::Promote,
        Err(e @ StoreError::DuplicateCampaign(_)) => Staged::Invalid(e),
        Err(e) => Staged::Truncated(e),
    }
}

fn recover_staged(store: &dyn RecordStore) -> Result<(), StoreError> {
    if !store.has_staged()? {
        return Ok(());
    }
    let verdict = match store.read_staged() {
        Ok(bytes) => inspect_staged(&bytes),
        Err(e) => Staged::Truncated(e),
    };
    match verdict {
        Staged::Promote => {
            info!(store = %store.describe(), "promoting staged campaign file left by an interrupted save");
            store.discard_committed()?;
            store.promote_staged()
        }
        Staged::Truncated(e) => {
            warn!(store = %store.describe(), error = %e, "discarding truncated staged campaign file");
            store.discard_staged()
        }
        Staged::Invalid(e) => {
            error!(
                store = %store.describe(),
                error = %e,
                "staged campaign file is complete but invalid, keeping the committed file"
            );
            store.discard_staged()
        }
    }
}

fn index(campaigns: impl IntoIterator<Item = Campaign>) -> Result<BTreeMap<String, Campaign>, StoreError> {
    let mut out = BTreeMap::new();
    for c in campaigns {
        if out.contains_key(&c.id) {
            return Err(StoreError::DuplicateCampaign(c.id));
        }
        out.insert(c.id.clone(), c);
    }
    Ok(out)
}

fn decode(bytes: &[u8]) -> Result<BTreeMap<String, Campaign>, StoreError> {
    let file: RecordFile = serde_json::from_slice(bytes).map_err(StoreError::Decode)?;
    index(file.campaigns)
}

fn encode(campaigns: &BTreeMap<String, Campaign>) -> Result<Vec<u8>, StoreError> {
    let file = RecordFile {
        campaigns: campaigns.values().cloned().collect(),
    };
    serde_json::to_vec_pretty(&file).map_err(StoreError::Encode)
}
