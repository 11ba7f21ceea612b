//! Canonical argument keys
//!
//! Key format:
//! ```text
//! [8 bytes: arity u64 little-endian]
//! [field]*            one per argument
//! ```
//!
//! Field format (tag byte + payload):
//! ```text
//! 0x00 unit / None
//! 0x01 bool          [1 byte: 0 | 1]
//! 0x02 int           [16 bytes: i128 little-endian]
//! 0x03 big uint      [16 bytes: u128 little-endian, > i128::MAX]
//! 0x04 float         [8 bytes: f64 bits little-endian]
//! 0x05 str           [8 bytes: len u64][len bytes: UTF-8]
//! 0x06 list          [8 bytes: count u64][count fields]
//! 0x07 some          [1 field]
//! ```
//!
//! Variable-length payloads are always length-prefixed, so the bytes of one
//! argument can never be read as the boundary of another.

use std::borrow::Cow;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

use nom::{
    combinator::{all_consuming, map, map_res, verify},
    error::ErrorKind,
    multi::{count, length_data},
    number::complete::{le_f64, le_i128, le_u128, le_u64, le_u8},
    IResult,
};

use crate::error::Result;

const TAG_UNIT: u8 = 0x00;
const TAG_BOOL: u8 = 0x01;
const TAG_INT: u8 = 0x02;
const TAG_BIG_UINT: u8 = 0x03;
const TAG_FLOAT: u8 = 0x04;
const TAG_STR: u8 = 0x05;
const TAG_LIST: u8 = 0x06;
const TAG_SOME: u8 = 0x07;

/// Deepest list/`Some` nesting accepted by [`decode`]
const MAX_DEPTH: usize = 128;

/// A value with a canonical key encoding
///
/// Structurally equal values must encode to identical bytes. All integer
/// widths share one representation, so `2u8` and `2i64` produce the same
/// field.
pub trait Canonical {
    /// Append this value's field(s) to the encoder
    fn canonicalize(&self, enc: &mut KeyEncoder);
}

/// The argument list of a memoized function
///
/// Implemented for tuples of up to eight [`Canonical`] fields and, for
/// variadic functions, for vectors, arrays and slices of one field type.
pub trait Args {
    /// Number of arguments in the list
    fn arity(&self) -> usize;

    /// Encode each argument as one top-level field
    fn encode_fields(&self, enc: &mut KeyEncoder);
}

/// Append-only writer for the canonical key format
#[derive(Debug)]
pub struct KeyEncoder {
    buf: Vec<u8>,
}

impl KeyEncoder {
    fn with_arity(arity: usize) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&(arity as u64).to_le_bytes());
        Self { buf }
    }

    /// Write a unit field (also used for `None`)
    pub fn write_unit(&mut self) {
        self.buf.push(TAG_UNIT);
    }

    /// Write a bool field
    pub fn write_bool(&mut self, value: bool) {
        self.buf.push(TAG_BOOL);
        self.buf.push(value as u8);
    }

    /// Write an integer field
    pub fn write_int(&mut self, value: i128) {
        self.buf.push(TAG_INT);
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write an unsigned integer field
    ///
    /// Values that fit in `i128` share the signed representation.
    pub fn write_uint(&mut self, value: u128) {
        match i128::try_from(value) {
            Ok(v) => self.write_int(v),
            Err(_) => {
                self.buf.push(TAG_BIG_UINT);
                self.buf.extend_from_slice(&value.to_le_bytes());
            }
        }
    }

    /// Write a float field
    ///
    /// `-0.0` is written as `0.0` and every NaN as the same quiet NaN.
    pub fn write_float(&mut self, value: f64) {
        let value = if value == 0.0 {
            0.0
        } else if value.is_nan() {
            f64::NAN
        } else {
            value
        };
        self.buf.push(TAG_FLOAT);
        self.buf.extend_from_slice(&value.to_bits().to_le_bytes());
    }

    /// Write a string field
    pub fn write_str(&mut self, value: &str) {
        self.buf.push(TAG_STR);
        self.buf.extend_from_slice(&(value.len() as u64).to_le_bytes());
        self.buf.extend_from_slice(value.as_bytes());
    }

    /// Start a list field; the caller must then write exactly `len` fields
    pub fn begin_list(&mut self, len: usize) {
        self.buf.push(TAG_LIST);
        self.buf.extend_from_slice(&(len as u64).to_le_bytes());
    }

    /// Start a `Some` field; the caller must then write exactly one field
    pub fn begin_some(&mut self) {
        self.buf.push(TAG_SOME);
    }

    fn finish(self) -> CacheKey {
        CacheKey(self.buf.into_boxed_slice())
    }
}

/// Canonical encoding of an argument list
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(Box<[u8]>);

impl CacheKey {
    /// Build the key for an argument list
    pub fn from_args<A: Args + ?Sized>(args: &A) -> Self {
        let mut enc = KeyEncoder::with_arity(args.arity());
        args.encode_fields(&mut enc);
        enc.finish()
    }

    /// Rebuild a key from raw bytes, validating the layout
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        decode(bytes)?;
        Ok(CacheKey(bytes.into()))
    }

    /// Raw encoded bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Encoded length in bytes
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false: every key carries at least the arity header
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of arguments the key was built from
    pub fn arity(&self) -> u64 {
        let mut header = [0u8; 8];
        header.copy_from_slice(&self.0[..8]);
        u64::from_le_bytes(header)
    }

    /// Decode the argument fields
    pub fn fields(&self) -> Result<Vec<KeyField>> {
        decode(&self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.fields() {
            Ok(fields) => {
                f.write_str("(")?;
                write_joined(f, &fields)?;
                f.write_str(")")
            }
            Err(_) => {
                f.write_str("<")?;
                for b in self.0.iter() {
                    write!(f, "{:02x}", b)?;
                }
                f.write_str(">")
            }
        }
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey{}", self)
    }
}

/// A decoded key field
#[derive(Debug, Clone, PartialEq)]
pub enum KeyField {
    /// Unit or `None`
    Unit,
    /// Boolean
    Bool(bool),
    /// Integer of any width that fits `i128`
    Int(i128),
    /// Unsigned integer above `i128::MAX`
    UInt(u128),
    /// Normalised float
    Float(f64),
    /// String or char
    Str(String),
    /// Sequence or tuple
    List(Vec<KeyField>),
    /// `Some` wrapper
    Some(Box<KeyField>),
}

impl fmt::Display for KeyField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyField::Unit => f.write_str("()"),
            KeyField::Bool(b) => write!(f, "{}", b),
            KeyField::Int(i) => write!(f, "{}", i),
            KeyField::UInt(u) => write!(f, "{}", u),
            KeyField::Float(x) => write!(f, "{:?}", x),
            KeyField::Str(s) => write!(f, "{:?}", s),
            KeyField::List(items) => {
                f.write_str("[")?;
                write_joined(f, items)?;
                f.write_str("]")
            }
            KeyField::Some(inner) => write!(f, "Some({})", inner),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, fields: &[KeyField]) -> fmt::Result {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{}", field)?;
    }
    Ok(())
}

/// Parse canonical key bytes into their argument fields
pub fn decode(input: &[u8]) -> Result<Vec<KeyField>> {
    let (_, fields) = all_consuming(parse_key)(input)?;
    Ok(fields)
}

fn parse_key(input: &[u8]) -> IResult<&[u8], Vec<KeyField>> {
    let (input, arity) = le_u64(input)?;
    parse_fields(input, arity, 0)
}

fn parse_fields(input: &[u8], n: u64, depth: usize) -> IResult<&[u8], Vec<KeyField>> {
    // Every field takes at least its tag byte
    if n > input.len() as u64 {
        return Err(fail(input, ErrorKind::Count));
    }
    count(|i| parse_field(i, depth), n as usize)(input)
}

fn parse_field(input: &[u8], depth: usize) -> IResult<&[u8], KeyField> {
    if depth > MAX_DEPTH {
        return Err(fail(input, ErrorKind::TooLarge));
    }
    let (input, tag) = le_u8(input)?;
    match tag {
        TAG_UNIT => Ok((input, KeyField::Unit)),
        TAG_BOOL => {
            let (rest, b) = le_u8(input)?;
            match b {
                0 => Ok((rest, KeyField::Bool(false))),
                1 => Ok((rest, KeyField::Bool(true))),
                _ => Err(fail(input, ErrorKind::Verify)),
            }
        }
        TAG_INT => map(le_i128, KeyField::Int)(input),
        TAG_BIG_UINT => map(
            verify(le_u128, |v: &u128| *v > i128::MAX as u128),
            KeyField::UInt,
        )(input),
        TAG_FLOAT => map(le_f64, KeyField::Float)(input),
        TAG_STR => map_res(length_data(le_u64), |bytes: &[u8]| {
            std::str::from_utf8(bytes).map(|s| KeyField::Str(s.to_owned()))
        })(input),
        TAG_LIST => {
            let (input, n) = le_u64(input)?;
            let (rest, items) = parse_fields(input, n, depth + 1)?;
            Ok((rest, KeyField::List(items)))
        }
        TAG_SOME => {
            let (rest, inner) = parse_field(input, depth + 1)?;
            Ok((rest, KeyField::Some(Box::new(inner))))
        }
        _ => Err(fail(input, ErrorKind::Tag)),
    }
}

fn fail(input: &[u8], kind: ErrorKind) -> nom::Err<nom::error::Error<&[u8]>> {
    nom::Err::Error(nom::error::Error::new(input, kind))
}

macro_rules! canonical_int {
    ($($t:ty),*) => {
        $(
            impl Canonical for $t {
                fn canonicalize(&self, enc: &mut KeyEncoder) {
                    enc.write_int(*self as i128);
                }
            }
        )*
    };
}

canonical_int!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, usize);

impl Canonical for u128 {
    fn canonicalize(&self, enc: &mut KeyEncoder) {
        enc.write_uint(*self);
    }
}

impl Canonical for bool {
    fn canonicalize(&self, enc: &mut KeyEncoder) {
        enc.write_bool(*self);
    }
}

impl Canonical for f32 {
    fn canonicalize(&self, enc: &mut KeyEncoder) {
        enc.write_float(f64::from(*self));
    }
}

impl Canonical for f64 {
    fn canonicalize(&self, enc: &mut KeyEncoder) {
        enc.write_float(*self);
    }
}

impl Canonical for char {
    fn canonicalize(&self, enc: &mut KeyEncoder) {
        let mut buf = [0u8; 4];
        enc.write_str(self.encode_utf8(&mut buf));
    }
}

impl Canonical for str {
    fn canonicalize(&self, enc: &mut KeyEncoder) {
        enc.write_str(self);
    }
}

impl Canonical for String {
    fn canonicalize(&self, enc: &mut KeyEncoder) {
        enc.write_str(self);
    }
}

impl Canonical for () {
    fn canonicalize(&self, enc: &mut KeyEncoder) {
        enc.write_unit();
    }
}

impl<T: Canonical> Canonical for Option<T> {
    fn canonicalize(&self, enc: &mut KeyEncoder) {
        match self {
            Some(value) => {
                enc.begin_some();
                value.canonicalize(enc);
            }
            None => enc.write_unit(),
        }
    }
}

impl<T: Canonical> Canonical for [T] {
    fn canonicalize(&self, enc: &mut KeyEncoder) {
        enc.begin_list(self.len());
        for item in self {
            item.canonicalize(enc);
        }
    }
}

impl<T: Canonical, const N: usize> Canonical for [T; N] {
    fn canonicalize(&self, enc: &mut KeyEncoder) {
        self.as_slice().canonicalize(enc);
    }
}

impl<T: Canonical> Canonical for Vec<T> {
    fn canonicalize(&self, enc: &mut KeyEncoder) {
        self.as_slice().canonicalize(enc);
    }
}

impl<T: Canonical + ?Sized> Canonical for &T {
    fn canonicalize(&self, enc: &mut KeyEncoder) {
        (**self).canonicalize(enc);
    }
}

impl<T: Canonical + ?Sized> Canonical for Box<T> {
    fn canonicalize(&self, enc: &mut KeyEncoder) {
        (**self).canonicalize(enc);
    }
}

impl<T: Canonical + ?Sized> Canonical for Rc<T> {
    fn canonicalize(&self, enc: &mut KeyEncoder) {
        (**self).canonicalize(enc);
    }
}

impl<T: Canonical + ?Sized> Canonical for Arc<T> {
    fn canonicalize(&self, enc: &mut KeyEncoder) {
        (**self).canonicalize(enc);
    }
}

impl<B> Canonical for Cow<'_, B>
where
    B: Canonical + ToOwned + ?Sized,
{
    fn canonicalize(&self, enc: &mut KeyEncoder) {
        (**self).canonicalize(enc);
    }
}

impl Args for () {
    fn arity(&self) -> usize {
        0
    }

    fn encode_fields(&self, _enc: &mut KeyEncoder) {}
}

macro_rules! tuple_impls {
    ($n:expr; $($name:ident . $idx:tt),+) => {
        impl<$($name: Canonical),+> Args for ($($name,)+) {
            fn arity(&self) -> usize {
                $n
            }

            fn encode_fields(&self, enc: &mut KeyEncoder) {
                $(self.$idx.canonicalize(enc);)+
            }
        }

        impl<$($name: Canonical),+> Canonical for ($($name,)+) {
            fn canonicalize(&self, enc: &mut KeyEncoder) {
                enc.begin_list($n);
                $(self.$idx.canonicalize(enc);)+
            }
        }
    };
}

tuple_impls!(1; T0.0);
tuple_impls!(2; T0.0, T1.1);
tuple_impls!(3; T0.0, T1.1, T2.2);
tuple_impls!(4; T0.0, T1.1, T2.2, T3.3);
tuple_impls!(5; T0.0, T1.1, T2.2, T3.3, T4.4);
tuple_impls!(6; T0.0, T1.1, T2.2, T3.3, T4.4, T5.5);
tuple_impls!(7; T0.0, T1.1, T2.2, T3.3, T4.4, T5.5, T6.6);
tuple_impls!(8; T0.0, T1.1, T2.2, T3.3, T4.4, T5.5, T6.6, T7.7);

impl<T: Canonical> Args for [T] {
    fn arity(&self) -> usize {
        self.len()
    }

    fn encode_fields(&self, enc: &mut KeyEncoder) {
        for item in self {
            item.canonicalize(enc);
        }
    }
}

impl<T: Canonical> Args for &[T] {
    fn arity(&self) -> usize {
        self.len()
    }

    fn encode_fields(&self, enc: &mut KeyEncoder) {
        (**self).encode_fields(enc);
    }
}

impl<T: Canonical> Args for Vec<T> {
    fn arity(&self) -> usize {
        self.len()
    }

    fn encode_fields(&self, enc: &mut KeyEncoder) {
        self.as_slice().encode_fields(enc);
    }
}

impl<T: Canonical, const N: usize> Args for [T; N] {
    fn arity(&self) -> usize {
        N
    }

    fn encode_fields(&self, enc: &mut KeyEncoder) {
        self.as_slice().encode_fields(enc);
    }
}
