//! Cache key derivation
//!
//! A [`CacheKey`] is the function's identifier folded together with a SHA-256
//! digest over a canonical encoding of its arguments. Arguments are compared by
//! content, never by identity: every rerun builds fresh argument objects, and two
//! equal-content instances must land on the same key.
//!
//! Small arguments (numbers, text, sequences, maps) are encoded value by value.
//! Large or tabular arguments are wrapped in [`Content`] and reduced to a digest of
//! their canonical JSON serialization. Live handles (open files, connections)
//! report [`ArgValue::Handle`] and are rejected with a configuration error.

use crate::error::{CacheError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// Hash type for content-based addressing
pub type ContentHash = [u8; 32];

/// Stable identifier of a registered function; doubles as its key namespace
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId(Arc<str>);

impl FunctionId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for FunctionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for FunctionId {
    fn from(id: String) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Key of one cached result: namespace plus argument digest
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    function: FunctionId,
    hash: ContentHash,
}

impl CacheKey {
    pub fn function(&self) -> &FunctionId {
        &self.function
    }

    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    /// First 12 hex characters of the argument digest
    pub fn short_hash(&self) -> String {
        hex::encode(&self.hash[..6])
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.function, self.short_hash())
    }
}

/// Canonical, content-only view of one argument
#[derive(Debug, Clone)]
pub enum ArgValue {
    Unit,
    Bool(bool),
    Int(i128),
    Float(f64),
    Text(String),
    Seq(Vec<ArgValue>),
    Map(BTreeMap<String, ArgValue>),
    /// Pre-computed content digest of a large argument
    Digest(ContentHash),
    /// A live, non-reproducible handle; never valid key material
    Handle(String),
}

impl ArgValue {
    /// Digest a serializable value through its canonical JSON form.
    ///
    /// Object keys are sorted, so two values that differ only in map ordering
    /// produce the same digest.
    pub fn content<T: Serialize + ?Sized>(value: &T) -> Result<Self> {
        let canonical = serde_json::to_value(value).map_err(|e| {
            CacheError::config(format!("argument cannot be serialized for hashing: {}", e))
        })?;
        let bytes = serde_json::to_vec(&canonical).map_err(|e| {
            CacheError::config(format!("argument cannot be serialized for hashing: {}", e))
        })?;
        Ok(ArgValue::Digest(sha256(&bytes)))
    }

    /// Describe the first live handle found in this value, if any
    pub fn find_handle(&self) -> Option<&str> {
        match self {
            ArgValue::Handle(kind) => Some(kind),
            ArgValue::Seq(items) => items.iter().find_map(ArgValue::find_handle),
            ArgValue::Map(map) => map.values().find_map(ArgValue::find_handle),
            _ => None,
        }
    }

    fn feed(&self, hasher: &mut Sha256) {
        match self {
            ArgValue::Unit => hasher.update([0u8]),
            ArgValue::Bool(b) => hasher.update([1u8, *b as u8]),
            ArgValue::Int(i) => {
                hasher.update([2u8]);
                hasher.update(i.to_le_bytes());
            }
            ArgValue::Float(f) => {
                hasher.update([3u8]);
                hasher.update(canonical_float_bits(*f).to_le_bytes());
            }
            ArgValue::Text(s) => {
                hasher.update([4u8]);
                feed_str(hasher, s);
            }
            ArgValue::Seq(items) => {
                hasher.update([5u8]);
                feed_len(hasher, items.len());
                for item in items {
                    item.feed(hasher);
                }
            }
            ArgValue::Map(map) => {
                hasher.update([6u8]);
                feed_len(hasher, map.len());
                for (k, v) in map {
                    feed_str(hasher, k);
                    v.feed(hasher);
                }
            }
            ArgValue::Digest(digest) => {
                hasher.update([7u8]);
                hasher.update(digest);
            }
            ArgValue::Handle(kind) => {
                hasher.update([8u8]);
                feed_str(hasher, kind);
            }
        }
    }
}

/// `-0.0` and `0.0` hash alike, as do all NaN payloads
fn canonical_float_bits(f: f64) -> u64 {
    if f == 0.0 {
        0.0f64.to_bits()
    } else if f.is_nan() {
        f64::NAN.to_bits()
    } else {
        f.to_bits()
    }
}

fn feed_len(hasher: &mut Sha256, len: usize) {
    hasher.update((len as u64).to_le_bytes());
}

fn feed_str(hasher: &mut Sha256, s: &str) {
    feed_len(hasher, s.len());
    hasher.update(s.as_bytes());
}

fn sha256(bytes: &[u8]) -> ContentHash {
    let digest = Sha256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// Derive the cache key for one call.
///
/// Deterministic and pure. Fails with `ConfigurationError` when any argument
/// contains a live handle.
pub fn derive(function: &FunctionId, args: &[ArgValue]) -> Result<CacheKey> {
    for (position, arg) in args.iter().enumerate() {
        if let Some(kind) = arg.find_handle() {
            return Err(CacheError::config(format!(
                "argument {} of `{}` is a non-reproducible {}; pass identifying data (e.g. a connection string) instead",
                position, function, kind
            )));
        }
    }

    let mut hasher = Sha256::new();
    feed_str(&mut hasher, function.as_str());
    feed_len(&mut hasher, args.len());
    for arg in args {
        arg.feed(&mut hasher);
    }

    let digest = hasher.finalize();
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&digest);

    Ok(CacheKey {
        function: function.clone(),
        hash,
    })
}

/// A value usable as cache key material
pub trait CacheArg {
    fn to_arg(&self) -> Result<ArgValue>;
}

/// The full argument list of a cached function
pub trait CacheArgs {
    fn to_args(&self) -> Result<Vec<ArgValue>>;
}

macro_rules! int_args {
    ($($t:ty),*) => {
        $(impl CacheArg for $t {
            fn to_arg(&self) -> Result<ArgValue> {
                Ok(ArgValue::Int(*self as i128))
            }
        })*
    };
}

int_args!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, usize);

impl CacheArg for f64 {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(ArgValue::Float(*self))
    }
}

impl CacheArg for f32 {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(ArgValue::Float(f64::from(*self)))
    }
}

impl CacheArg for bool {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(ArgValue::Bool(*self))
    }
}

impl CacheArg for char {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(ArgValue::Text(self.to_string()))
    }
}

impl CacheArg for str {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(ArgValue::Text(self.to_string()))
    }
}

impl CacheArg for String {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(ArgValue::Text(self.clone()))
    }
}

impl CacheArg for () {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(ArgValue::Unit)
    }
}

impl<T: CacheArg + ?Sized> CacheArg for &T {
    fn to_arg(&self) -> Result<ArgValue> {
        (**self).to_arg()
    }
}

impl<T: CacheArg + ?Sized> CacheArg for Box<T> {
    fn to_arg(&self) -> Result<ArgValue> {
        (**self).to_arg()
    }
}

impl<T: CacheArg + ?Sized> CacheArg for Arc<T> {
    fn to_arg(&self) -> Result<ArgValue> {
        (**self).to_arg()
    }
}

impl<T: CacheArg> CacheArg for Option<T> {
    fn to_arg(&self) -> Result<ArgValue> {
        match self {
            None => Ok(ArgValue::Unit),
            Some(v) => Ok(ArgValue::Seq(vec![v.to_arg()?])),
        }
    }
}

impl<T: CacheArg> CacheArg for [T] {
    fn to_arg(&self) -> Result<ArgValue> {
        self.iter()
            .map(CacheArg::to_arg)
            .collect::<Result<Vec<_>>>()
            .map(ArgValue::Seq)
    }
}

impl<T: CacheArg, const N: usize> CacheArg for [T; N] {
    fn to_arg(&self) -> Result<ArgValue> {
        self.as_slice().to_arg()
    }
}

impl<T: CacheArg> CacheArg for Vec<T> {
    fn to_arg(&self) -> Result<ArgValue> {
        self.as_slice().to_arg()
    }
}

impl<T: CacheArg> CacheArg for BTreeSet<T> {
    fn to_arg(&self) -> Result<ArgValue> {
        self.iter()
            .map(CacheArg::to_arg)
            .collect::<Result<Vec<_>>>()
            .map(ArgValue::Seq)
    }
}

impl<T: CacheArg> CacheArg for BTreeMap<String, T> {
    fn to_arg(&self) -> Result<ArgValue> {
        let mut map = BTreeMap::new();
        for (k, v) in self {
            map.insert(k.clone(), v.to_arg()?);
        }
        Ok(ArgValue::Map(map))
    }
}

impl<T: CacheArg, S> CacheArg for HashMap<String, T, S> {
    fn to_arg(&self) -> Result<ArgValue> {
        let mut map = BTreeMap::new();
        for (k, v) in self {
            map.insert(k.clone(), v.to_arg()?);
        }
        Ok(ArgValue::Map(map))
    }
}

impl CacheArg for std::fs::File {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(ArgValue::Handle("open file".to_string()))
    }
}

impl CacheArg for std::net::TcpStream {
    fn to_arg(&self) -> Result<ArgValue> {
        Ok(ArgValue::Handle("network connection".to_string()))
    }
}

/// Wrapper for large or tabular arguments, hashed by content digest
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Content<T>(pub T);

impl<T> Deref for Content<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: Serialize> CacheArg for Content<T> {
    fn to_arg(&self) -> Result<ArgValue> {
        ArgValue::content(&self.0)
    }
}

/// A single argument that is not a tuple
impl<T: CacheArg> CacheArgs for T {
    fn to_args(&self) -> Result<Vec<ArgValue>> {
        Ok(vec![self.to_arg()?])
    }
}

macro_rules! tuple_args {
    ($($t:ident $v:ident),+) => {
        impl<$($t: CacheArg),+> CacheArgs for ($($t,)+) {
            fn to_args(&self) -> Result<Vec<ArgValue>> {
                let ($($v,)+) = self;
                Ok(vec![$($v.to_arg()?),+])
            }
        }
    };
}

tuple_args!(A a);
tuple_args!(A a, B b);
tuple_args!(A a, B b, C c);
tuple_args!(A a, B b, C c, D d);
tuple_args!(A a, B b, C c, D d, E e);
tuple_args!(A a, B b, C c, D d, E e, F f);
