//! Binary tick decoding
//!
//! Layout (type byte already stripped):
//!
//! ```text
//! count: u8
//! repeat count:
//!     participant_id: u8
//!     sync: u8                        bit flags, LSB first
//!     [bit 0] x: i32, y: i32, rotation: i32
//!     [bit 1] health: u32
//!     [bit 2] shield: u32
//!     [bit 3] energy: u32             not tracked
//! ```
//!
//! All integers are big-endian.

use bitvec::prelude::*;
use smallvec::SmallVec;

use crate::game::constants::battle::SPAWNED_AI_PARTICIPANT_MIN;
use crate::game::types::GameLocation;
use crate::net::framing::PayloadReader;

const SYNC_POSITION: usize = 0;
const SYNC_HEALTH: usize = 1;
const SYNC_SHIELD: usize = 2;
const SYNC_ENERGY: usize = 3;

/// Most rosters fit inline
pub type TickBatch = SmallVec<[TickUpdate; 16]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickUpdate {
    pub participant_id: u8,
    pub position: Option<(GameLocation, i32)>,
    pub health: Option<u32>,
    pub shield: Option<u32>,
}

impl TickUpdate {
    /// Mechs spawned mid-battle by abilities, not part of the roster
    pub fn is_spawned_ai(&self) -> bool {
        self.participant_id > SPAWNED_AI_PARTICIPANT_MIN
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TickError {
    #[error("Empty tick")]
    Empty,
    #[error("Tick truncated at byte {0}")]
    Truncated(usize),
}

/// Decode every machine update in a tick payload
pub fn decode_tick(data: &[u8]) -> Result<TickBatch, TickError> {
    let mut reader = PayloadReader::new(data);
    let count = reader.u8().ok_or(TickError::Empty)?;
    let truncated = |r: &PayloadReader| TickError::Truncated(r.position());

    let mut batch = TickBatch::with_capacity(count as usize);
    for _ in 0..count {
        let participant_id = reader.u8().ok_or_else(|| truncated(&reader))?;
        let sync = reader.u8().ok_or_else(|| truncated(&reader))?;
        let flags = sync.view_bits::<Lsb0>();

        let mut update = TickUpdate {
            participant_id,
            position: None,
            health: None,
            shield: None,
        };

        if flags[SYNC_POSITION] {
            let x = reader.i32().ok_or_else(|| truncated(&reader))?;
            let y = reader.i32().ok_or_else(|| truncated(&reader))?;
            let rotation = reader.i32().ok_or_else(|| truncated(&reader))?;
            update.position = Some((GameLocation::new(x, y), rotation));
        }
        if flags[SYNC_HEALTH] {
            update.health = Some(reader.u32().ok_or_else(|| truncated(&reader))?);
        }
        if flags[SYNC_SHIELD] {
            update.shield = Some(reader.u32().ok_or_else(|| truncated(&reader))?);
        }
        if flags[SYNC_ENERGY] {
            reader.skip(4).ok_or_else(|| truncated(&reader))?;
        }

        batch.push(update);
    }

    Ok(batch)
}

#[cfg(test)]
pub(crate) fn encode_tick(updates: &[TickUpdate]) -> Vec<u8> {
    use crate::net::framing::PayloadWriter;

    let mut w = PayloadWriter::default();
    w.u8(updates.len() as u8);
    for u in updates {
        let mut sync = 0u8;
        sync.view_bits_mut::<Lsb0>().set(SYNC_POSITION, u.position.is_some());
        sync.view_bits_mut::<Lsb0>().set(SYNC_HEALTH, u.health.is_some());
        sync.view_bits_mut::<Lsb0>().set(SYNC_SHIELD, u.shield.is_some());
        w.u8(u.participant_id).u8(sync);
        if let Some((loc, rotation)) = u.position {
            w.i32(loc.x).i32(loc.y).i32(rotation);
        }
        if let Some(health) = u.health {
            w.u32(health);
        }
        if let Some(shield) = u.shield {
            w.u32(shield);
        }
    }
    w.finish()
}
