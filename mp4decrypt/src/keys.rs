//! Key material and the key store.

use crate::{Error, Result, error::code};
use std::{collections::HashMap, fmt, num::NonZeroU32, str::FromStr};
use thiserror::Error;

macro_rules! key_bytes {
    ($name: ident, $doc: literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name([u8; 16]);

        impl $name {
            pub const fn new(bytes: [u8; 16]) -> Self {
                Self(bytes)
            }

            pub fn as_bytes(&self) -> &[u8; 16] {
                &self.0
            }
        }

        impl From<[u8; 16]> for $name {
            fn from(value: [u8; 16]) -> Self {
                Self(value)
            }
        }

        impl TryFrom<&[u8]> for $name {
            type Error = Error;

            fn try_from(value: &[u8]) -> Result<Self> {
                value
                    .try_into()
                    .map(Self)
                    .map_err(|_| Error::MalformedKey(value.len()))
            }
        }

        impl FromStr for $name {
            type Err = Error;

            /// Parse exactly 32 hex digits.
            fn from_str(s: &str) -> Result<Self> {
                let bytes = hex::decode(s).map_err(|_| Error::MalformedKey(s.len() / 2))?;
                Self::try_from(bytes.as_slice())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

key_bytes!(Kid, "A 128-bit key identifier.");
key_bytes!(ContentKey, "A 128-bit AES content key.");

/// What a content key unlocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyTarget {
    Kid(Kid),
    Track(NonZeroU32),
}

impl fmt::Display for KeyTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kid(kid) => write!(f, "kid {}", kid),
            Self::Track(track_id) => write!(f, "track {}", track_id),
        }
    }
}

/// Reasons a textual key specification can be rejected, in the order they are checked.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum KeySpecError {
    #[error("missing ':' separator between id and key")]
    Split,

    #[error("invalid hex format for key id '{0}'")]
    KidHex(String),

    #[error("invalid track id '{0}'")]
    TrackId(String),

    #[error("invalid hex format for key '{0}'")]
    KeyHex(String),
}

impl KeySpecError {
    pub fn code(&self) -> i32 {
        match self {
            Self::Split => code::SPLIT,
            Self::KidHex(_) => code::KID_HEX,
            Self::TrackId(_) => code::TRACK_ID,
            Self::KeyHex(_) => code::KEY_HEX,
        }
    }
}

/// A key given as `<id>:<key>`.
///
/// `id` is a 32 digit hex KID or a decimal track id, `key` is 32 hex digits. An
/// id of exactly 32 characters is always read as a KID.
///
/// ```
/// use mp4decrypt::{KeySpec, KeyTarget};
///
/// let spec: KeySpec = "1:100b6c20940f779a4589152b57d2dacb".parse().unwrap();
/// assert!(matches!(spec.target, KeyTarget::Track(x) if x.get() == 1));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeySpec {
    pub target: KeyTarget,
    pub key: ContentKey,
}

impl FromStr for KeySpec {
    type Err = KeySpecError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (id, key) = s.split_once(':').ok_or(KeySpecError::Split)?;

        let target = if id.len() == 32 {
            KeyTarget::Kid(id.parse().map_err(|_| KeySpecError::KidHex(id.to_owned()))?)
        } else {
            let track_id = id
                .parse::<u32>()
                .ok()
                .and_then(NonZeroU32::new)
                .ok_or_else(|| KeySpecError::TrackId(id.to_owned()))?;
            KeyTarget::Track(track_id)
        };

        let key = key
            .parse()
            .map_err(|_| KeySpecError::KeyHex(key.to_owned()))?;

        Ok(Self { target, key })
    }
}

/// Content keys indexed by KID and by track id.
///
/// Inserting a key for an id that already has one replaces it.
#[derive(Clone, Debug, Default)]
pub struct KeyStore {
    by_kid: HashMap<Kid, ContentKey>,
    by_track: HashMap<NonZeroU32, ContentKey>,
    group_key: Option<ContentKey>,
}

impl KeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the flat binary key list: 32 bytes per entry, a KID followed by its key.
    pub fn from_binary(data: &[u8]) -> Result<Self> {
        if data.len() % 32 != 0 {
            return Err(Error::MalformedKey(data.len() % 32));
        }

        let mut keys = Self::new();

        for entry in data.chunks_exact(32) {
            keys.set_key_for_kid(&entry[..16], &entry[16..])?;
        }

        Ok(keys)
    }

    pub fn set_key_for_kid(&mut self, kid: &[u8], key: &[u8]) -> Result<()> {
        let kid = Kid::try_from(kid)?;
        let key = ContentKey::try_from(key)?;
        self.insert(KeyTarget::Kid(kid), key);
        Ok(())
    }

    pub fn set_key_for_track(&mut self, track_id: u32, key: &[u8]) -> Result<()> {
        let track_id = NonZeroU32::new(track_id)
            .ok_or_else(|| KeySpecError::TrackId(track_id.to_string()))?;
        let key = ContentKey::try_from(key)?;
        self.insert(KeyTarget::Track(track_id), key);
        Ok(())
    }

    /// Set the Marlin group key, used to unwrap the track keys of `ACGK` content.
    pub fn set_group_key(&mut self, key: &[u8]) -> Result<()> {
        self.group_key = Some(ContentKey::try_from(key)?);
        Ok(())
    }

    pub fn insert(&mut self, target: KeyTarget, key: ContentKey) {
        match target {
            KeyTarget::Kid(kid) => self.by_kid.insert(kid, key),
            KeyTarget::Track(track_id) => self.by_track.insert(track_id, key),
        };
    }

    /// Parse and insert every key, or none of them if any is invalid.
    pub fn extend_from_specs<S: AsRef<str>>(
        &mut self,
        specs: &[S],
    ) -> std::result::Result<(), KeySpecError> {
        let specs = specs
            .iter()
            .map(|x| x.as_ref().parse::<KeySpec>())
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for spec in specs {
            self.insert(spec.target, spec.key);
        }

        Ok(())
    }

    pub fn lookup(&self, kid: &Kid) -> Option<&ContentKey> {
        self.by_kid.get(kid)
    }

    pub fn lookup_track(&self, track_id: u32) -> Option<&ContentKey> {
        NonZeroU32::new(track_id).and_then(|x| self.by_track.get(&x))
    }

    pub fn group_key(&self) -> Option<&ContentKey> {
        self.group_key.as_ref()
    }

    /// Key for a track, looked up by KID first and then by track id.
    pub fn resolve(&self, kid: Option<&Kid>, track_id: u32) -> Option<&ContentKey> {
        kid.and_then(|x| self.lookup(x))
            .or_else(|| self.lookup_track(track_id))
    }

    pub fn len(&self) -> usize {
        self.by_kid.len() + self.by_track.len() + self.group_key.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
