//! Durable state snapshots.
//!
//! The persisted layout is one structured JSON document holding the full
//! switch/STP/traffic collections as explicitly tagged records in switch-id
//! order, plus a last-modified timestamp. Encoding is independent of any map
//! type's own serialization behavior.

use crate::error::{Result, SimError};
use crate::store::{NetworkState, StateStore};
use chrono::{DateTime, Utc};
use labswitch_types::{SpanningTreeInstance, Switch, SwitchTrafficStats};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Current snapshot document version.
pub const DOC_VERSION: u32 = 1;

/// One persisted entity record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Record {
    Switch {
        switch: Switch,
    },
    Stp {
        switch_id: String,
        instance: SpanningTreeInstance,
    },
    Traffic {
        switch_id: String,
        stats: SwitchTrafficStats,
    },
}

/// The on-disk snapshot document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedDocument {
    pub version: u32,
    pub last_updated: Option<DateTime<Utc>>,
    pub records: Vec<Record>,
}

/// Encodes state into the persisted document, switch-id-major.
pub fn encode_state(state: &NetworkState) -> PersistedDocument {
    let mut records = Vec::with_capacity(state.switches.len() * 3);
    for (id, switch) in &state.switches {
        records.push(Record::Switch {
            switch: switch.clone(),
        });
        if let Some(instance) = state.stp.get(id) {
            records.push(Record::Stp {
                switch_id: id.clone(),
                instance: instance.clone(),
            });
        }
        if let Some(stats) = state.traffic.get(id) {
            records.push(Record::Traffic {
                switch_id: id.clone(),
                stats: stats.clone(),
            });
        }
    }
    PersistedDocument {
        version: DOC_VERSION,
        last_updated: state.last_updated,
        records,
    }
}

/// Rebuilds state from a persisted document.
///
/// STP/traffic records for unknown switches are dropped with a warning
/// rather than failing the whole load.
pub fn decode_state(doc: &PersistedDocument) -> Result<NetworkState> {
    if doc.version != DOC_VERSION {
        return Err(SimError::Persistence(format!(
            "unsupported snapshot version {}",
            doc.version
        )));
    }
    let mut state = NetworkState {
        last_updated: doc.last_updated,
        ..NetworkState::default()
    };
    for record in &doc.records {
        match record {
            Record::Switch { switch } => {
                state.switches.insert(switch.id.clone(), switch.clone());
            }
            Record::Stp {
                switch_id,
                instance,
            } => {
                if state.switches.contains_key(switch_id) {
                    state.stp.insert(switch_id.clone(), instance.clone());
                } else {
                    warn!(switch = %switch_id, "dropping STP record for unknown switch");
                }
            }
            Record::Traffic { switch_id, stats } => {
                if state.switches.contains_key(switch_id) {
                    state.traffic.insert(switch_id.clone(), stats.clone());
                } else {
                    warn!(switch = %switch_id, "dropping traffic record for unknown switch");
                }
            }
        }
    }
    Ok(state)
}

/// Writes the state snapshot atomically (temp file + rename).
pub async fn save_to(path: &Path, state: &NetworkState) -> Result<()> {
    let doc = encode_state(state);
    let json = serde_json::to_vec_pretty(&doc)?;

    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, &json).await?;
    tokio::fs::rename(&tmp, path).await?;
    debug!(path = %path.display(), records = doc.records.len(), "state saved");
    Ok(())
}

/// Loads the snapshot at `path`, or returns an empty state when none exists.
pub async fn load_or_default(path: &Path) -> Result<NetworkState> {
    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let doc: PersistedDocument = serde_json::from_slice(&bytes)?;
            let state = decode_state(&doc)?;
            info!(
                path = %path.display(),
                switches = state.switches.len(),
                "loaded state snapshot"
            );
            Ok(state)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %path.display(), "no saved state, starting empty");
            Ok(NetworkState::default())
        }
        Err(e) => Err(e.into()),
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Spawns the background saver.
///
/// Commits raise the store's dirty flag; the saver debounces briefly so a
/// burst of commits produces one write, with at most one write in flight.
/// It also saves on the fixed autosave interval and once more at shutdown.
/// A failed write logs, re-raises the dirty flag, and is retried on the next
/// cycle; in-memory state is never rolled back.
pub fn spawn_saver(
    store: Arc<StateStore>,
    path: PathBuf,
    autosave_interval: Duration,
    debounce: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(autosave_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick of a tokio interval fires immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = store.dirty_notified() => {
                    // Coalesce a burst of commits into one write.
                    tokio::time::sleep(debounce).await;
                }
                _ = interval.tick() => {}
            }

            if store.take_dirty() {
                save_current(&store, &path).await;
            }
        }

        // Final save at shutdown, dirty or not.
        save_current(&store, &path).await;
        info!(path = %path.display(), "saver stopped");
    })
}

async fn save_current(store: &StateStore, path: &Path) {
    let snapshot = store.read();
    if let Err(e) = save_to(path, &snapshot.state).await {
        warn!(error = %e, path = %path.display(), "state save failed, will retry");
        store.mark_save_failed();
    }
}
