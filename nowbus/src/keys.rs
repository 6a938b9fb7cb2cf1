//! Group key derivation.
//!
//! Every secret the bus uses descends from the group name:
//!
//! ```text
//! secret   = SHA-256(group_name)
//! pmk      = SHA-256("pmk"   || secret)[..16]    link primary master key
//! lmk      = SHA-256("lmk"   || secret)[..16]    link local master key
//! key_auth = SHA-256("auth"  || secret)[..16]    control-frame HMAC key
//! key_bcast= SHA-256("bcast" || secret)[..16]    broadcast-frame HMAC key
//! group_id = SHA-256("gid"   || secret)[..4]     as little-endian u32
//! ```
//!
//! Identical group names on different nodes therefore derive identical keys
//! and the same public group id, with no pairing step.

use crate::traits::Crypto;
use crate::types::PacketType;

/// The derived key set for one bus instance.
#[derive(Clone)]
pub struct DerivedKeys {
    pub pmk: [u8; 16],
    pub lmk: [u8; 16],
    pub key_auth: [u8; 16],
    pub key_bcast: [u8; 16],
    /// Public 32-bit group tag carried in every authenticated frame.
    pub group_id: u32,
}

impl DerivedKeys {
    /// The HMAC key for an authenticated packet type.
    pub fn key_for(&self, pkt_type: PacketType) -> &[u8; 16] {
        match pkt_type {
            PacketType::DataBroadcast => &self.key_bcast,
            _ => &self.key_auth,
        }
    }
}

// Keys are secrets; keep them out of debug output.
impl core::fmt::Debug for DerivedKeys {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DerivedKeys")
            .field("group_id", &self.group_id)
            .finish_non_exhaustive()
    }
}

/// Derive the full key set from a group name. Deterministic.
pub fn derive_keys<C: Crypto>(crypto: &C, group_name: &str) -> DerivedKeys {
    let secret = crypto.sha256(group_name.as_bytes());

    let expand = |label: &[u8]| -> [u8; 32] {
        let mut input = [0u8; 5 + 32];
        input[..label.len()].copy_from_slice(label);
        input[label.len()..label.len() + 32].copy_from_slice(&secret);
        crypto.sha256(&input[..label.len() + 32])
    };

    let take16 = |digest: [u8; 32]| -> [u8; 16] {
        let mut out = [0u8; 16];
        out.copy_from_slice(&digest[..16]);
        out
    };

    let gid = expand(b"gid");
    DerivedKeys {
        pmk: take16(expand(b"pmk")),
        lmk: take16(expand(b"lmk")),
        key_auth: take16(expand(b"auth")),
        key_bcast: take16(expand(b"bcast")),
        group_id: u32::from_le_bytes([gid[0], gid[1], gid[2], gid[3]]),
    }
}
