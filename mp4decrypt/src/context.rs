//! Reusable decryption contexts.

use crate::{
    ByteStream, ContentKey, Error, KeySpec, KeySpecError, KeyStore, Processor, Result,
    SchemeFamily,
    detect::{ContainerInfo, detect},
};
use mp4crypt::stream::{ReadSeek, WriteSeek};
use std::{collections::HashMap, path::Path, sync::Arc};

/// Builder for creating [`Context`] instances.
///
/// # Example
///
/// ```no_run
/// use mp4decrypt::Mp4Decrypter;
///
/// let context = Mp4Decrypter::new()
///     .key("eb676abbcb345e96bbcf616630f1a3da", "100b6c20940f779a4589152b57d2dacb")?
///     .key("2", "0f0e0d0c0b0a09080706050403020100")?
///     .build()?;
/// # Ok::<(), mp4decrypt::Error>(())
/// ```
#[derive(Clone, Debug, Default)]
pub struct Mp4Decrypter {
    keys: KeyStore,
    scheme: Option<SchemeFamily>,
}

impl Mp4Decrypter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key for a KID (32 hex digits) or a decimal track id.
    pub fn key(self, id: &str, key: &str) -> Result<Self> {
        let spec = format!("{}:{}", id, key).parse::<KeySpec>()?;
        Ok(self.key_spec(spec))
    }

    /// Add keys given as `<id>:<key>`. Either all of them are added or none.
    pub fn keys<S: AsRef<str>>(mut self, specs: &[S]) -> Result<Self> {
        self.keys.extend_from_specs(specs)?;
        Ok(self)
    }

    pub fn key_spec(mut self, spec: KeySpec) -> Self {
        self.keys.insert(spec.target, spec.key);
        self
    }

    /// Add a KID/key pair from raw bytes.
    pub fn key_bytes(mut self, kid: [u8; 16], key: [u8; 16]) -> Self {
        self.keys.insert(crate::KeyTarget::Kid(kid.into()), key.into());
        self
    }

    /// Set the Marlin `ACGK` group key (32 hex digits).
    pub fn group_key(mut self, key: &str) -> Result<Self> {
        let key = key
            .parse::<ContentKey>()
            .map_err(|_| KeySpecError::KeyHex(key.to_owned()))?;
        self.keys.set_group_key(key.as_bytes())?;
        Ok(self)
    }

    /// Use a fixed scheme instead of detecting it for every input.
    pub fn scheme(mut self, scheme: SchemeFamily) -> Self {
        self.scheme = Some(scheme);
        self
    }

    pub fn build(self) -> Result<Context> {
        if self.keys.is_empty() {
            return Err(Error::NoKeys);
        }

        Ok(match self.scheme {
            Some(scheme) => Context::with_scheme(self.keys, scheme),
            None => Context::new(self.keys),
        })
    }
}

/// Keys plus the processor that uses them.
///
/// A context only reads its state while decrypting, so one context can serve
/// many calls, from several threads through an `Arc<Context>` too.
pub struct Context {
    keys: Arc<KeyStore>,
    processor: Option<Processor>,
}

impl Context {
    /// Create a context that detects the scheme of every input.
    pub fn new(keys: KeyStore) -> Self {
        Self {
            keys: Arc::new(keys),
            processor: None,
        }
    }

    /// Create a context for inputs of one known scheme.
    pub fn with_scheme(keys: KeyStore, scheme: SchemeFamily) -> Self {
        let keys = Arc::new(keys);

        Self {
            processor: Some(Processor::new(scheme, keys.clone())),
            keys,
        }
    }

    pub fn builder() -> Mp4Decrypter {
        Mp4Decrypter::new()
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// The fixed scheme, `None` when it is detected per input.
    pub fn scheme(&self) -> Option<SchemeFamily> {
        self.processor.as_ref().map(Processor::family)
    }

    /// Decrypt in memory.
    ///
    /// With `fragments_info` the track information is read from it, `data`
    /// holds fragments only and so does the output.
    pub fn decrypt(&self, data: &[u8], fragments_info: Option<&[u8]>) -> Result<Vec<u8>> {
        if data.is_empty() {
            return Err(Error::NoInputData);
        }

        let mut input = ByteStream::from_slice(data);
        let mut fragments_info = fragments_info.map(ByteStream::from_slice);
        let mut output = ByteStream::memory();

        self.process(
            &mut input,
            &mut output,
            fragments_info.as_mut().map(|x| x as &mut dyn ReadSeek),
        )?;

        Ok(output.finish()?.unwrap_or_default())
    }

    /// Decrypt a file into another, streaming from disk.
    ///
    /// The output file is left behind on failure and must be discarded by the caller.
    pub fn decrypt_file(
        &self,
        input_path: impl AsRef<Path>,
        output_path: impl AsRef<Path>,
        fragments_info_path: Option<impl AsRef<Path>>,
    ) -> Result<()> {
        let mut input = ByteStream::open(input_path)?;
        let mut fragments_info = fragments_info_path.map(ByteStream::open).transpose()?;
        let mut output = ByteStream::create(output_path)?;

        self.process(
            &mut input,
            &mut output,
            fragments_info.as_mut().map(|x| x as &mut dyn ReadSeek),
        )?;

        output.finish()?;
        Ok(())
    }

    /// Run one decryption pass over opened streams.
    ///
    /// Without a fixed scheme the scheme is detected from `fragments_info` when
    /// given, from `input` otherwise.
    pub fn process(
        &self,
        input: &mut dyn ReadSeek,
        output: &mut dyn WriteSeek,
        mut fragments_info: Option<&mut dyn ReadSeek>,
    ) -> Result<()> {
        let detected;
        let processor = match &self.processor {
            Some(x) => x,
            None => {
                let info = match fragments_info.as_deref_mut() {
                    Some(x) => ContainerInfo::read(x)?,
                    None => ContainerInfo::read(&mut *input)?,
                };
                let family = detect(&info);
                log::debug!("detected {} scheme", family);

                detected = Processor::new(family, self.keys.clone());
                &detected
            }
        };

        processor.process(input, output, fragments_info)
    }
}

/// Decrypt in memory with keys given as `<id>:<key>`.
///
/// `on_output` is called once, only on success. The slice it receives is freed
/// right after it returns.
pub fn decrypt_with_key_specs<S, F>(
    data: &[u8],
    specs: &[S],
    fragments_info: Option<&[u8]>,
    on_output: F,
) -> Result<()>
where
    S: AsRef<str>,
    F: FnOnce(&[u8]),
{
    let mut keys = KeyStore::new();
    keys.extend_from_specs(specs)?;

    let output = Context::new(keys).decrypt(data, fragments_info)?;
    on_output(&output);
    Ok(())
}

/// Decrypt encrypted mp4 data stream using given keys.
///
/// # Arguments
///
/// * `data` - Encrypted data stream.
/// * `keys` - Hashmap of keys for decrypting data stream.
///   Hashmap `key` is either a track ID in decimal or a 128-bit KID in hex.
///   Hashmap `value` is a 128-bit key in hex. <br>
///   1. For dcf files, use 1 as the track index <br>
///   2. For Marlin IPMP/ACGK, use 0 as the track ID <br>
///   3. KIDs are only applicable to some encryption methods like MPEG-CENC <br>
/// * `fragments_info` (optional) - Decrypt the fragments read from data stream, with track info read from this stream.
///
/// # Example
///
/// ```no_run
/// use std::collections::HashMap;
///
/// let keys = HashMap::from([(
///     "eb676abbcb345e96bbcf616630f1a3da".to_owned(),
///     "100b6c20940f779a4589152b57d2dacb".to_owned(),
/// )]);
///
/// let decrypted_data = mp4decrypt::mp4decrypt(&[0, 0, 0, 112], &keys, None).unwrap();
/// ```
pub fn mp4decrypt(
    data: &[u8],
    keys: &HashMap<String, String>,
    fragments_info: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let mut builder = Mp4Decrypter::new();

    for (id, key) in keys {
        builder = match id.as_str() {
            "0" => builder.group_key(key)?,
            _ => builder.key(id, key)?,
        };
    }

    builder.build()?.decrypt(data, fragments_info)
}
